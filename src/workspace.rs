//! Exclusive lock on a workspace for the duration of one invocation.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{io_context, ProvisionError, Result};

pub const LOCK_FILENAME: &str = ".provision.lock";

/// Held while a task graph runs; released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Fails with [`ProvisionError::Locked`] instead of waiting.
    pub fn acquire(workspace: &Path) -> Result<Self> {
        fs::create_dir_all(workspace).map_err(io_context(format!(
            "creating workspace '{}'",
            workspace.display()
        )))?;
        let path = workspace.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_context(format!("opening lock file '{}'", path.display())))?;
        file.try_lock_exclusive()
            .map_err(|_| ProvisionError::Locked {
                path: workspace.to_path_buf(),
            })?;
        tracing::debug!("locked workspace {}", workspace.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
