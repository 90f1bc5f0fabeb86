//! Exclusive directory locking
//!
//! One process at a time may own a data directory. The lock is an advisory
//! OS file lock on `<dir>/.lock`, released when the guard drops (the OS
//! also releases it on abnormal process exit).

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::{MetabaseError, Result};

/// An exclusive lock on a directory, held for the guard's lifetime.
pub struct DirLock {
    // Keeping the handle open keeps the OS lock.
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquire the lock on `<dir>/.lock` without blocking.
    ///
    /// Fails with [`MetabaseError::LockContended`] when another process
    /// already holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(".lock");
        let file = File::create(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "acquired directory lock");
                Ok(Self { _file: file, path })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(MetabaseError::LockContended(dir.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "released directory lock");
    }
}
