//! Positional block I/O on blocking threads

use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Read `len` bytes at `offset`. Bytes past EOF read as zero.
pub(crate) fn read_at_zero_filled(file: &File, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buf)
}

pub(crate) async fn read_block(file: Arc<File>, offset: u64, len: usize) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || read_at_zero_filled(&file, offset, len))
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}

pub(crate) async fn write_block(file: Arc<File>, offset: u64, data: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || file.write_all_at(&data, offset).map_err(Error::from))
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}

pub(crate) async fn sync(file: Arc<File>) -> Result<()> {
    tokio::task::spawn_blocking(move || file.sync_all().map_err(Error::from))
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}

pub(crate) fn open_read(path: &Path) -> Result<Arc<File>> {
    Ok(Arc::new(File::open(path)?))
}

pub(crate) fn open_write(path: &Path) -> Result<Arc<File>> {
    Ok(Arc::new(OpenOptions::new().write(true).open(path)?))
}

/// Create `<dir>/<blob>` in a fresh directory. An existing directory is
/// removed when `override_existing` is set and rejected otherwise.
pub(crate) fn create_blob(dir: &Path, blob: &Path, override_existing: bool) -> Result<Arc<File>> {
    if dir.exists() {
        if !override_existing {
            return Err(Error::DataDirExists(dir.to_path_buf()));
        }
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(blob)?;
    Ok(Arc::new(file))
}

/// Create every `(dir, blob)` pair in order. When one fails the
/// directories created before it are removed again.
pub(crate) fn create_blobs(
    targets: &[(PathBuf, PathBuf)],
    override_existing: bool,
) -> Result<Vec<Arc<File>>> {
    let mut files = Vec::with_capacity(targets.len());
    for (dir, blob) in targets {
        match create_blob(dir, blob, override_existing) {
            Ok(file) => files.push(file),
            Err(e) => {
                drop(files);
                for (created, _) in targets.iter().take_while(|(d, _)| d != dir) {
                    if let Err(err) = fs::remove_dir_all(created) {
                        warn!("Cannot remove {}: {}", created.display(), err);
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_short_read_is_zero_filled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BLOB");
        fs::write(&path, [1u8, 2, 3]).unwrap();
        let file = File::open(&path).unwrap();
        assert_eq!(read_at_zero_filled(&file, 1, 4).unwrap(), vec![2, 3, 0, 0]);
        assert_eq!(read_at_zero_filled(&file, 10, 2).unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("f");
        let blob = create_blob(&sub, &sub.join("BLOB"), false).unwrap();
        write_block(blob, 8, vec![7u8; 4]).await.unwrap();

        let input = open_read(&sub.join("BLOB")).unwrap();
        let back = read_block(input, 6, 8).await.unwrap();
        assert_eq!(back, vec![0, 0, 7, 7, 7, 7, 0, 0]);
    }

    #[test]
    fn test_write_and_sync_on_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("g");
        let blob = create_blob(&sub, &sub.join("BLOB"), false).unwrap();
        tokio_test::block_on(async {
            write_block(Arc::clone(&blob), 0, vec![9u8; 16]).await.unwrap();
            sync(blob).await.unwrap();
        });
        assert_eq!(fs::read(sub.join("BLOB")).unwrap(), vec![9u8; 16]);
    }

    #[test]
    fn test_create_blob_respects_override() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("f");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("old"), b"x").unwrap();

        assert_matches!(
            create_blob(&sub, &sub.join("BLOB"), false),
            Err(Error::DataDirExists(p)) if p == sub
        );
        create_blob(&sub, &sub.join("BLOB"), true).unwrap();
        assert!(!sub.join("old").exists());
        assert!(sub.join("BLOB").exists());
    }

    #[test]
    fn test_create_blobs_removes_earlier_dirs_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let targets: Vec<(PathBuf, PathBuf)> = ["a", "b", "c"]
            .iter()
            .map(|n| {
                let sub = dir.path().join(n);
                (sub.clone(), sub.join("BLOB"))
            })
            .collect();
        fs::create_dir_all(&targets[2].0).unwrap();

        assert_matches!(
            create_blobs(&targets, false),
            Err(Error::DataDirExists(p)) if p == targets[2].0
        );
        assert!(!targets[0].0.exists());
        assert!(!targets[1].0.exists());
        assert!(targets[2].0.exists());

        let files = create_blobs(&targets, true).unwrap();
        assert_eq!(files.len(), 3);
        assert!(targets.iter().all(|(_, blob)| blob.exists()));
    }
}
