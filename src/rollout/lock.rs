//! Per-app rollout lock

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// Exclusive advisory lock held for the duration of one app's rollout
///
/// Released on drop.
#[derive(Debug)]
pub struct RolloutLock {
    file: File,
    path: PathBuf,
}

impl RolloutLock {
    /// Take the lock without waiting
    ///
    /// Fails with [`Error::RolloutInProgress`] when another rollout holds it.
    pub fn acquire(path: &Path, app_name: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        fs2::FileExt::try_lock_exclusive(&file)
            .map_err(|_| Error::RolloutInProgress(app_name.to_string()))?;
        debug!(path = %path.display(), "acquired rollout lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RolloutLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "released rollout lock");
    }
}
