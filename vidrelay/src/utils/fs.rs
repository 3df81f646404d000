//! Filesystem helpers shared across modules.
//!
//! Every helper attaches the operation and path to IO errors.

use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure the parent directory of a file path exists with a custom operation label.
pub async fn ensure_parent_dir_with_op(op: &'static str, path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    ensure_dir_all_with_op(op, parent).await
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Remove a file, treating "already gone" as success.
///
/// Returns `true` when a file was actually removed.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error("removing file", path, e)),
    }
}

/// Size of a regular file, or `None` if it does not exist or is not a file.
pub async fn file_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_file_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        tokio::fs::write(&path, b"x").await.unwrap();

        assert!(remove_file_if_exists(&path).await.unwrap());
        assert!(!remove_file_if_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        tokio::fs::write(&path, vec![0u8; 42]).await.unwrap();

        assert_eq!(file_size(&path).await, Some(42));
        assert_eq!(file_size(dir.path()).await, None);
        assert_eq!(file_size(&dir.path().join("missing")).await, None);
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        ensure_parent_dir_with_op("creating test dir", &path)
            .await
            .unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }
}
