//! Owned local files.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::Result;
use crate::utils::fs;

/// Sole owner of one file on local disk.
///
/// Moving the handle transfers ownership. The file is deleted exactly once:
/// by [`release`](Self::release) on the normal path, or by `Drop` if the
/// owner unwinds or forgets to release it.
#[derive(Debug)]
pub struct LocalFileHandle {
    path: PathBuf,
    released: bool,
}

impl LocalFileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. A file that is already gone counts as released.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let removed = fs::remove_file_if_exists(&self.path).await?;
        debug!(path = %self.path.display(), removed, "Released local file");
        Ok(())
    }
}

impl Drop for LocalFileHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed local file on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove local file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp4");
        tokio::fs::write(&path, b"data").await.unwrap();

        let handle = LocalFileHandle::new(&path);
        handle.release().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_release_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let handle = LocalFileHandle::new(dir.path().join("never-written.mp4"));
        handle.release().await.unwrap();
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.mp4");
        std::fs::write(&path, b"data").unwrap();

        {
            let _handle = LocalFileHandle::new(&path);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_move_transfers_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.mp4");
        std::fs::write(&path, b"data").unwrap();

        let first = LocalFileHandle::new(&path);
        let holder = vec![first];
        assert!(path.exists());
        drop(holder);
        assert!(!path.exists());
    }
}
