//! Cross-process single-flight guard for ingestion runs.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Exclusive advisory lock held for the duration of one ingestion run.
pub struct RunGuard {
    path: PathBuf,
    lock_file: Option<File>,
}

impl RunGuard {
    /// Acquire the lock or fail with `RunInProgress` if another run holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "Run lock acquired");
                Ok(Self {
                    path: path.to_path_buf(),
                    lock_file: Some(lock_file),
                })
            }
            Err(_) => Err(Error::RunInProgress(path.display().to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) {
        if let Some(file) = self.lock_file.take() {
            let _ = file.unlock();
            debug!(path = %self.path.display(), "Run lock released");
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ingest.lock");

        let _first = RunGuard::acquire(&path).unwrap();
        let second = RunGuard::acquire(&path);
        assert!(matches!(second, Err(Error::RunInProgress(_))));
    }

    #[test]
    fn drop_releases_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locks").join("ingest.lock");
        {
            let guard = RunGuard::acquire(&path).unwrap();
            assert_eq!(guard.path(), path.as_path());
        }
        assert!(RunGuard::acquire(&path).is_ok());
    }

    #[test]
    fn double_release_is_safe() {
        let dir = tempdir().unwrap();
        let mut guard = RunGuard::acquire(&dir.path().join("ingest.lock")).unwrap();
        guard.release();
        guard.release();
    }
}
