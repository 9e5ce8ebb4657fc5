//! Persisted record of which patch is applied to each target.
//!
//! The file sits inside the staging tree, so resetting staging clears it
//! along with the patched sources.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{io_context, ProvisionError, Result};

pub const STATE_FILENAME: &str = ".provision-state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPatch {
    pub patch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub diff: String,
    pub applied_at_utc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchState {
    /// Target id to the patch currently applied to it.
    #[serde(default)]
    pub applied: BTreeMap<String, AppliedPatch>,
}

pub fn state_path(staging_dir: &Path) -> PathBuf {
    staging_dir.join(STATE_FILENAME)
}

impl PatchState {
    /// Missing file means nothing applied.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path)
            .map_err(io_context(format!("reading patch state '{}'", path.display())))?;
        serde_json::from_slice(&bytes).map_err(|err| ProvisionError::Io {
            context: format!("parsing patch state '{}'", path.display()),
            source: err.into(),
        })
    }

    /// Writes through a temporary sibling and renames into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|err| ProvisionError::Io {
            context: "serializing patch state".to_string(),
            source: err.into(),
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(io_context(format!("writing patch state '{}'", tmp.display())))?;
        fs::rename(&tmp, path).map_err(io_context(format!(
            "moving patch state into place '{}'",
            path.display()
        )))
    }

    pub fn get(&self, target: &str) -> Option<&AppliedPatch> {
        self.applied.get(target)
    }
}

pub(crate) fn now_utc() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty_state() {
        let tmp = TempDir::new().unwrap();
        let state = PatchState::load(&state_path(tmp.path())).unwrap();
        assert!(state.applied.is_empty());
    }

    #[test]
    fn save_then_load_keeps_entries() {
        let tmp = TempDir::new().unwrap();
        let path = state_path(tmp.path());
        let mut state = PatchState::default();
        state.applied.insert(
            "camera".to_string(),
            AppliedPatch {
                patch_id: "camera-router".to_string(),
                variant: Some("router".to_string()),
                diff: "patches/camera-router.patch".to_string(),
                applied_at_utc: now_utc(),
            },
        );
        state.save(&path).unwrap();

        let loaded = PatchState::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(
            loaded.get("camera").map(|p| p.patch_id.as_str()),
            Some("camera-router")
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_state_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = state_path(tmp.path());
        fs::write(&path, b"{ not json").unwrap();
        let err = PatchState::load(&path).unwrap_err();
        assert!(err.to_string().contains("parsing patch state"));
    }
}
