//! Content fingerprinting of media payloads
//!
//! Payloads are buffered and hashed in the same pass so nothing is read twice.

use radmig_common::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 64 * 1024;

/// Payload bytes together with their SHA-256 digest
#[derive(Debug, Clone)]
pub struct HashedPayload {
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256
    pub digest: String,
}

impl HashedPayload {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Read `reader` to the end, hashing every chunk as it arrives
pub async fn read_hashed<R>(mut reader: R) -> std::io::Result<HashedPayload>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut bytes = Vec::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        bytes.extend_from_slice(&buffer[..n]);
    }

    Ok(HashedPayload {
        bytes,
        digest: format!("{:x}", hasher.finalize()),
    })
}

/// SHA-256 of a file, computed on the blocking pool
pub async fn hash_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        use std::io::Read;

        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| Error::Internal(format!("Hash task panicked: {}", e)))?
}
