//! Advisory lock that keeps two updaters out of the same install directory.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{UpdateError, UpdateResult};

const LOCK_FILE_NAME: &str = ".relaynode-update.lock";

/// Exclusive lock on `<install_dir>/.relaynode-update.lock`, released on drop.
#[derive(Debug)]
pub struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Take the lock without blocking.
    ///
    /// Returns [`UpdateError::AlreadyRunning`] when another process holds it.
    pub fn acquire(install_dir: &Path) -> UpdateResult<Self> {
        fs::create_dir_all(install_dir)?;
        let path = install_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(UpdateError::AlreadyRunning { path });
            }
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), "Acquired update lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), "Failed to release update lock: {}", e);
        }
    }
}
