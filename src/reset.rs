//! Workspace reset. Destructive, no confirmation: callers confirm if needed.

use std::fs;
use std::path::Path;

use crate::config::ArchiveDescriptor;
use crate::error::{io_context, Result};
use crate::fetch::is_partial_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Removed,
    AlreadyClean,
}

/// Deletes the staging tree (and with it the patch state and any rendered
/// credentials).
pub fn reset_staging(descriptor: &ArchiveDescriptor, workspace: &Path) -> Result<ResetOutcome> {
    let staging = descriptor.staging_dir(workspace);
    if !staging.exists() {
        tracing::debug!("staging tree already absent: {}", staging.display());
        return Ok(ResetOutcome::AlreadyClean);
    }
    fs::remove_dir_all(&staging).map_err(io_context(format!(
        "removing staging tree '{}'",
        staging.display()
    )))?;
    tracing::info!("removed staging tree {}", staging.display());
    Ok(ResetOutcome::Removed)
}

/// [`reset_staging`], then deletes the archive and leftover partial downloads.
pub fn reset_all(descriptor: &ArchiveDescriptor, workspace: &Path) -> Result<ResetOutcome> {
    let mut outcome = reset_staging(descriptor, workspace)?;

    let archive = descriptor.archive_path(workspace);
    if archive.exists() {
        fs::remove_file(&archive).map_err(io_context(format!(
            "removing archive '{}'",
            archive.display()
        )))?;
        tracing::info!("removed archive {}", archive.display());
        outcome = ResetOutcome::Removed;
    }

    if workspace.is_dir() {
        let entries = fs::read_dir(workspace).map_err(io_context(format!(
            "reading workspace '{}'",
            workspace.display()
        )))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if is_partial_of(&path, &archive) {
                fs::remove_file(&path).map_err(io_context(format!(
                    "removing partial download '{}'",
                    path.display()
                )))?;
                outcome = ResetOutcome::Removed;
            }
        }
    }

    Ok(outcome)
}
