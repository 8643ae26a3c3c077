use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cross-process advisory lock guarding a persistent store.
///
/// Two modes: shared for reads, exclusive for writes. Lock state lives in a lock
/// file next to the store, so any number of build processes can coordinate without
/// a daemon. Guards release on drop.
#[derive(Debug, Clone)]
pub struct CrossProcessLock {
    path: PathBuf,
}

impl CrossProcessLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until a shared (read) lock is held.
    pub fn shared(&self) -> Result<LockGuard, LockError> {
        let file = self.open()?;
        file.lock_shared().map_err(|err| LockError::CouldNotLock {
            err,
            path: self.path.clone(),
        })?;
        Ok(LockGuard { file })
    }

    /// Block until an exclusive (write) lock is held.
    pub fn exclusive(&self) -> Result<LockGuard, LockError> {
        let file = self.open()?;
        file.lock_exclusive().map_err(|err| LockError::CouldNotLock {
            err,
            path: self.path.clone(),
        })?;
        Ok(LockGuard { file })
    }

    /// Attempt an exclusive lock without blocking; `None` when another process (or
    /// another handle in this one) holds it.
    pub fn try_exclusive(&self) -> Result<Option<LockGuard>, LockError> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(LockGuard { file })),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(LockError::CouldNotLock {
                err,
                path: self.path.clone(),
            }),
        }
    }

    fn open(&self) -> Result<File, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| LockError::CouldNotOpenLockFile {
                err,
                path: self.path.clone(),
            })?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|err| LockError::CouldNotOpenLockFile {
                err,
                path: self.path.clone(),
            })
    }
}

/// A held lock. Dropping it releases the underlying file lock.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Could not open lock file at {path:?} due to {err:?}")]
    CouldNotOpenLockFile { err: std::io::Error, path: PathBuf },

    #[error("Could not acquire lock on {path:?} due to {err:?}")]
    CouldNotLock { err: std::io::Error, path: PathBuf },
}
