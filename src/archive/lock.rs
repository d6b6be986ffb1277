//! Advisory lock on an archive root
//!
//! Implements exclusive, non-blocking locking using fd-lock. The lock covers
//! the whole root because the `batches/` directory is shared by every
//! resource. It is tied to the open file handle and released when the
//! [`ArchiveLock`] is dropped.

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lock file name inside the archive root
pub const LOCK_FILE_NAME: &str = ".archiver.lock";

/// Lock errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// IO error preparing the lock file
    #[error("IO error: {0}")]
    IoError(String),

    /// Another process holds the lock
    #[error("archive is locked by another run: {0}")]
    Held(String),
}

/// Exclusive lock held for the duration of a run
pub struct ArchiveLock {
    #[allow(dead_code)]
    lock: RwLock<File>,
    path: PathBuf,
}

impl ArchiveLock {
    /// Try to acquire the lock for `archive_root` without blocking
    ///
    /// Returns [`LockError::Held`] immediately if another handle owns it.
    pub fn try_acquire(archive_root: &Path) -> Result<Self, LockError> {
        std::fs::create_dir_all(archive_root).map_err(|e| {
            LockError::IoError(format!(
                "Failed to create directory {}: {e}",
                archive_root.display()
            ))
        })?;

        let path = archive_root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| LockError::IoError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        let guard = lock
            .try_write()
            .map_err(|e| LockError::Held(format!("{}: {e}", path.display())))?;
        // The OS lock belongs to the file handle; keep it until `lock` is dropped.
        std::mem::forget(guard);

        debug!(path = %path.display(), "Archive lock acquired");
        Ok(Self { lock, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
