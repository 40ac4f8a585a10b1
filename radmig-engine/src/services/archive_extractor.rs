//! Safe extraction of gzip-compressed tar backups
//!
//! Every entry path is cleaned and checked before anything is written: absolute
//! paths, `..` segments and anything resolving outside the destination root are
//! refused. Symbolic and hard links are refused outright. Only directories and
//! regular files are materialised; metadata-only entries (pax headers, GNU long
//! names) and device/fifo entries are ignored.
//!
//! Any failure aborts the whole extraction. The destination is a scratch directory
//! the caller discards on error.

use flate2::read::GzDecoder;
use radmig_common::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, info};

/// What an extraction wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Resolve an archive entry path under `root`, rejecting anything that escapes it
pub fn safe_join(root: &Path, entry_path: &Path) -> Result<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::Archive(format!(
                    "Entry escapes extraction root: {}",
                    entry_path.display()
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Archive(format!(
                    "Absolute entry path not allowed: {}",
                    entry_path.display()
                )))
            }
        }
    }

    if cleaned.as_os_str().is_empty() {
        return Err(Error::Archive(format!(
            "Empty entry path: '{}'",
            entry_path.display()
        )));
    }

    let target = root.join(&cleaned);
    if !target.starts_with(root) {
        return Err(Error::Archive(format!(
            "Entry escapes extraction root: {}",
            entry_path.display()
        )));
    }
    Ok(target)
}

/// Extract the gzip tar at `archive_path` into `dest` (blocking)
pub fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<ExtractSummary> {
    let file = File::open(archive_path).map_err(|e| {
        Error::Archive(format!("Cannot open {}: {}", archive_path.display(), e))
    })?;
    let summary = unpack(GzDecoder::new(file), dest)?;

    info!(
        archive = %archive_path.display(),
        dest = %dest.display(),
        files = summary.files,
        directories = summary.directories,
        bytes = summary.bytes,
        "Backup extracted"
    );
    Ok(summary)
}

/// Async wrapper; extraction runs to completion on the blocking pool and is not
/// interrupted by cancellation
pub async fn extract_archive(archive_path: PathBuf, dest: PathBuf) -> Result<ExtractSummary> {
    tokio::task::spawn_blocking(move || extract_tar_gz(&archive_path, &dest))
        .await
        .map_err(|e| Error::Internal(format!("Extraction task failed: {}", e)))?
}

fn unpack<R: Read>(reader: R, dest: &Path) -> Result<ExtractSummary> {
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(reader);
    let mut summary = ExtractSummary::default();

    let entries = archive
        .entries()
        .map_err(|e| Error::Archive(format!("Unreadable archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| Error::Archive(format!("Unreadable entry: {}", e)))?;
        let entry_type = entry.header().entry_type();
        let path = entry
            .path()
            .map_err(|e| Error::Archive(format!("Invalid entry path: {}", e)))?
            .into_owned();

        match entry_type {
            EntryType::Symlink | EntryType::Link => {
                return Err(Error::Archive(format!(
                    "Link entries are not allowed: {}",
                    path.display()
                )));
            }
            EntryType::Directory => {
                // `tar -C dir .` writes the root itself as `./`
                if path.components().all(|c| matches!(c, Component::CurDir)) {
                    debug!(path = %path.display(), "Skipping root directory entry");
                    continue;
                }
                let target = safe_join(dest, &path)?;
                fs::create_dir_all(&target)?;
                summary.directories += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                let target = safe_join(dest, &path)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out = File::create(&target)?;
                let written = io::copy(&mut entry, &mut out).map_err(|e| {
                    Error::Archive(format!("Truncated entry {}: {}", path.display(), e))
                })?;
                summary.files += 1;
                summary.bytes += written;
            }
            other => {
                debug!(path = %path.display(), entry_type = ?other, "Ignoring archive entry");
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use tar::{Builder, Header};
    use tempfile::TempDir;

    /// Header with a raw name, bypassing the builder's own path checks
    fn raw_header(name: &str, entry_type: EntryType, size: u64) -> Header {
        let mut header = Header::new_gnu();
        {
            let raw = header.as_old_mut();
            raw.name.iter_mut().for_each(|b| *b = 0);
            raw.name[..name.len()].copy_from_slice(name.as_bytes());
        }
        header.set_entry_type(entry_type);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_cksum();
        header
    }

    fn write_archive(dir: &Path, entries: &[(&str, EntryType, &str)]) -> PathBuf {
        let path = dir.join("backup.tar.gz");
        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = Builder::new(encoder);
        for (name, entry_type, data) in entries {
            let header = raw_header(name, *entry_type, data.len() as u64);
            builder.append(&header, data.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_nested_regular_file_is_extracted() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(
            dir.path(),
            &[
                ("media/", EntryType::Directory, ""),
                ("media/station/song.mp3", EntryType::Regular, "ID3 fake"),
            ],
        );
        let dest = dir.path().join("out");

        let summary = extract_tar_gz(&archive, &dest).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.directories, 1);
        assert_eq!(summary.bytes, 8);
        assert_eq!(
            fs::read(dest.join("media").join("station").join("song.mp3")).unwrap(),
            b"ID3 fake"
        );
    }

    #[test]
    fn test_root_directory_entry_is_skipped() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(
            dir.path(),
            &[
                ("./", EntryType::Directory, ""),
                ("./manifest.json", EntryType::Regular, "{}"),
            ],
        );
        let dest = dir.path().join("out");

        let summary = extract_tar_gz(&archive, &dest).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.directories, 0);
        assert_eq!(fs::read(dest.join("manifest.json")).unwrap(), b"{}");
    }

    #[test]
    fn test_root_path_as_regular_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(dir.path(), &[("./", EntryType::Regular, "x")]);

        let err = extract_tar_gz(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::Archive(msg) if msg.contains("Empty")));
    }

    #[test]
    fn test_parent_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(
            dir.path(),
            &[("../../etc/passwd", EntryType::Regular, "root:x:0:0")],
        );
        let dest = dir.path().join("a").join("b").join("out");

        let err = extract_tar_gz(&archive, &dest).unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
        assert!(!dir.path().join("a").join("etc").exists());
        assert!(!dir.path().join("etc").exists());
    }

    #[test]
    fn test_absolute_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(
            dir.path(),
            &[("/etc/passwd", EntryType::Regular, "root:x:0:0")],
        );
        let dest = dir.path().join("out");

        let err = extract_tar_gz(&archive, &dest).unwrap_err();
        assert!(matches!(err, Error::Archive(msg) if msg.contains("Absolute")));
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn test_links_are_rejected() {
        for entry_type in [EntryType::Symlink, EntryType::Link] {
            let dir = TempDir::new().unwrap();
            let archive = write_archive(dir.path(), &[("evil", entry_type, "")]);
            let err = extract_tar_gz(&archive, &dir.path().join("out")).unwrap_err();
            assert!(matches!(err, Error::Archive(msg) if msg.contains("Link")));
        }
    }

    #[test]
    fn test_failure_mid_archive_aborts() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(
            dir.path(),
            &[
                ("ok.txt", EntryType::Regular, "fine"),
                ("../escape.txt", EntryType::Regular, "bad"),
                ("later.txt", EntryType::Regular, "never"),
            ],
        );
        let dest = dir.path().join("out");

        assert!(extract_tar_gz(&archive, &dest).is_err());
        assert!(!dir.path().join("escape.txt").exists());
        assert!(!dest.join("later.txt").exists());
    }

    #[test]
    fn test_not_gzip_is_archive_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.txt");
        fs::write(&path, b"definitely not gzip").unwrap();

        let err = extract_tar_gz(&path, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }

    #[test]
    fn test_safe_join_cleans_current_dir_segments() {
        let root = Path::new("/scratch/job");
        assert_eq!(
            safe_join(root, Path::new("./media/./a.mp3")).unwrap(),
            PathBuf::from("/scratch/job/media/a.mp3")
        );
        assert!(safe_join(root, Path::new("media/../../x")).is_err());
        assert!(safe_join(root, Path::new(".")).is_err());
    }

    #[tokio::test]
    async fn test_async_wrapper() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(dir.path(), &[("a.txt", EntryType::Regular, "a")]);
        let dest = dir.path().join("out");

        let summary = extract_archive(archive, dest.clone()).await.unwrap();
        assert_eq!(summary.files, 1);
        assert!(dest.join("a.txt").exists());
    }
}
