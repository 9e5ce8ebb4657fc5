//! Archive fetch and extraction.
//!
//! Both operations are idempotent through the filesystem: an existing archive
//! file or extraction directory is taken as done and never re-validated. A
//! fresh download lands in a temporary sibling and is renamed into place only
//! once complete (and checksum-verified, when a digest is configured). A fresh
//! extraction unpacks into a scratch directory inside the workspace and moves
//! the expected top-level directory into place, so an interrupted unpack never
//! looks like a finished one.

mod download;
mod unpack;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ArchiveDescriptor;
use crate::error::{ProvisionError, Result};

pub(crate) use download::is_partial_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    AlreadyPresent,
    Downloaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    AlreadyExtracted,
    Extracted,
}

/// Makes sure the archive exists in `workspace`, downloading it if absent.
pub fn ensure_archive(descriptor: &ArchiveDescriptor, workspace: &Path) -> Result<FetchOutcome> {
    let dest = descriptor.archive_path(workspace);
    if dest.exists() {
        tracing::debug!("archive already present: {}", dest.display());
        return Ok(FetchOutcome::AlreadyPresent);
    }

    let fetch_error = |reason: String| ProvisionError::Fetch {
        url: descriptor.url.clone(),
        path: dest.clone(),
        reason,
    };

    fs::create_dir_all(workspace)
        .map_err(|e| fetch_error(format!("creating workspace '{}': {e}", workspace.display())))?;

    tracing::info!("fetching {} -> {}", descriptor.url, dest.display());
    let partial = download::partial_path(&dest);
    let result = download::retrieve(&descriptor.url, &partial, descriptor.timeout)
        .and_then(|bytes| verify_checksum(descriptor, &partial).map(|()| bytes))
        .and_then(|bytes| {
            fs::rename(&partial, &dest)
                .map(|()| bytes)
                .map_err(|e| format!("moving download into place: {e}"))
        });

    match result {
        Ok(bytes) => {
            tracing::info!("downloaded {} ({} bytes)", dest.display(), bytes);
            Ok(FetchOutcome::Downloaded)
        }
        Err(reason) => {
            let _ = fs::remove_file(&partial);
            Err(fetch_error(reason))
        }
    }
}

/// Makes sure the archive is unpacked into `workspace/<dir_name>`.
pub fn ensure_extracted(descriptor: &ArchiveDescriptor, workspace: &Path) -> Result<ExtractOutcome> {
    let staging = descriptor.staging_dir(workspace);
    if staging.exists() {
        tracing::debug!("staging tree already present: {}", staging.display());
        return Ok(ExtractOutcome::AlreadyExtracted);
    }

    let archive = descriptor.archive_path(workspace);
    let extract_error = |reason: String| ProvisionError::Extract {
        archive: archive.clone(),
        reason,
    };
    if !archive.is_file() {
        return Err(extract_error(
            "archive file is missing; run 'get-archive' first".to_string(),
        ));
    }

    let scratch = scratch_dir(workspace, &descriptor.dir_name);
    fs::create_dir_all(&scratch).map_err(|e| {
        extract_error(format!(
            "creating scratch directory '{}': {e}",
            scratch.display()
        ))
    })?;

    tracing::info!("extracting {} -> {}", archive.display(), staging.display());
    let result = unpack::unpack_into(descriptor.format, &archive, &scratch).and_then(|()| {
        let unpacked = scratch.join(&descriptor.dir_name);
        if !unpacked.is_dir() {
            return Err(format!(
                "archive does not contain top-level directory '{}'",
                descriptor.dir_name
            ));
        }
        fs::rename(&unpacked, &staging).map_err(|e| {
            format!(
                "moving '{}' to '{}': {e}",
                unpacked.display(),
                staging.display()
            )
        })
    });
    unpack::remove_scratch(&scratch);

    result.map_err(extract_error)?;
    Ok(ExtractOutcome::Extracted)
}

fn scratch_dir(workspace: &Path, dir_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    workspace.join(format!(".{dir_name}.extract-{nanos}"))
}

fn verify_checksum(descriptor: &ArchiveDescriptor, path: &Path) -> std::result::Result<(), String> {
    let Some(expected) = descriptor.sha256.as_deref() else {
        return Ok(());
    };
    let actual =
        download::sha256_file(path).map_err(|e| format!("hashing '{}': {e}", path.display()))?;
    if actual != expected {
        return Err(format!(
            "sha256 mismatch: expected {expected}, got {actual}"
        ));
    }
    Ok(())
}
