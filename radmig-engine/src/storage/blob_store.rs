//! Blob storage for media payloads

use async_trait::async_trait;
use radmig_common::{Error, Result};
use std::path::{Path, PathBuf};

/// Stores media bytes and hands back an opaque storage key
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` for `item_id` of `station_id`, returning the storage key
    async fn store(&self, station_id: &str, item_id: &str, bytes: &[u8]) -> Result<String>;

    /// Locator clients use to fetch the blob
    fn url_for(&self, storage_key: &str) -> String;

    async fn delete(&self, storage_key: &str) -> Result<()>;
}

/// Filesystem blob store: `<root>/<station_id>/<item_id>`
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, storage_key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in storage_key.split('/') {
            check_component(part)?;
            path.push(part);
        }
        Ok(path)
    }
}

/// Key components become path segments; anything that could leave the root is refused
fn check_component(part: &str) -> Result<()> {
    if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
        return Err(Error::InvalidInput(format!(
            "Invalid storage key component: '{}'",
            part
        )));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, station_id: &str, item_id: &str, bytes: &[u8]) -> Result<String> {
        check_component(station_id)?;
        check_component(item_id)?;
        if station_id.contains('/') || item_id.contains('/') {
            return Err(Error::InvalidInput(
                "Storage key components must not contain '/'".to_string(),
            ));
        }

        let key = format!("{}/{}", station_id, item_id);
        let path = self.path_for(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Readers never see a partially written blob
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(storage_key = %key, bytes = bytes.len(), "Stored blob");
        Ok(key)
    }

    fn url_for(&self, storage_key: &str) -> String {
        format!("/media/{}", storage_key)
    }

    async fn delete(&self, storage_key: &str) -> Result<()> {
        let path = self.path_for(storage_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        let key = store.store("station-1", "item-1", b"payload").await.unwrap();
        assert_eq!(key, "station-1/item-1");
        assert_eq!(store.url_for(&key), "/media/station-1/item-1");
        assert_eq!(
            std::fs::read(dir.path().join("station-1").join("item-1")).unwrap(),
            b"payload"
        );

        store.delete(&key).await.unwrap();
        assert!(!dir.path().join("station-1").join("item-1").exists());
        // Deleting twice is fine
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_components() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        assert!(store.store("..", "x", b"").await.is_err());
        assert!(store.store("s", "../x", b"").await.is_err());
        assert!(store.delete("../outside").await.is_err());
    }
}
