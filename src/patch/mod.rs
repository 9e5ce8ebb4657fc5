//! Patch engine: applies and reverts unified diffs against a target's staged
//! directory with the host `patch` tool.
//!
//! Every run is preceded by a `--dry-run` of the same command, so a diff that
//! does not apply cleanly is rejected before any file is touched. Which patch
//! is applied to which target is recorded in [`state::PatchState`]; the engine
//! consults it before invoking the tool:
//!
//! | recorded for target  | `apply(p)`          | `revert(p)`     |
//! |----------------------|---------------------|-----------------|
//! | nothing              | run tool            | `NotApplied`    |
//! | `p`                  | `AlreadyApplied`    | run tool        |
//! | other patch `q`      | `VariantConflict`   | `NotApplied`    |
//!
//! When the record and the tree disagree (the state file was deleted, or the
//! tree was edited by hand) the tool's rejection surfaces as `PatchConflict`.

pub mod state;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::{PatchSpec, ProvisionConfig, Target};
use crate::error::{PatchDirection, ProvisionError, Result};
use state::{now_utc, state_path, AppliedPatch, PatchState};

const PATCH_COMMAND: &str = "patch";

#[derive(Debug, Clone)]
pub struct PatchEngine {
    staging_dir: PathBuf,
    strip: u32,
    tool: String,
}

impl PatchEngine {
    pub fn new(staging_dir: impl Into<PathBuf>, strip: u32) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            strip,
            tool: PATCH_COMMAND.to_string(),
        }
    }

    /// Runs `tool` instead of the `patch` found on `PATH`.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self::new(config.staging_dir(), config.patch_strip)
    }

    pub fn state_path(&self) -> PathBuf {
        state_path(&self.staging_dir)
    }

    pub fn target_dir(&self, target: &Target) -> PathBuf {
        self.staging_dir.join(&target.path)
    }

    /// The patch recorded as applied to `target`, if any.
    pub fn applied(&self, target: &Target) -> Result<Option<AppliedPatch>> {
        Ok(PatchState::load(&self.state_path())?
            .get(&target.id)
            .cloned())
    }

    /// Applies `patch` to `target`. Not idempotent: a second call fails.
    pub fn apply(&self, target: &Target, patch: &PatchSpec) -> Result<()> {
        let diff = self.check_inputs(target, patch)?;
        let state_file = self.state_path();
        let mut state = PatchState::load(&state_file)?;
        let patch_id = patch.id();

        if let Some(current) = state.get(&target.id) {
            if current.patch_id == patch_id {
                return Err(ProvisionError::AlreadyApplied {
                    target: target.id.clone(),
                    patch_id,
                });
            }
            return Err(ProvisionError::VariantConflict {
                target: target.id.clone(),
                applied: current.patch_id.clone(),
                requested: patch_id,
            });
        }

        let dir = self.target_dir(target);
        self.run_tool(target, &patch_id, &dir, &diff, PatchDirection::Apply, true)?;
        self.run_tool(target, &patch_id, &dir, &diff, PatchDirection::Apply, false)?;

        state.applied.insert(
            target.id.clone(),
            AppliedPatch {
                patch_id: patch_id.clone(),
                variant: patch.variant.clone(),
                diff: patch.file.display().to_string(),
                applied_at_utc: now_utc(),
            },
        );
        save_after_tool_run(&state, &state_file, target, &patch_id, "patched")?;
        tracing::info!("applied patch '{}' to target '{}'", patch_id, target.id);
        Ok(())
    }

    /// Reverts `patch` from `target`. Fails if it is not the recorded patch.
    pub fn revert(&self, target: &Target, patch: &PatchSpec) -> Result<()> {
        let diff = self.check_inputs(target, patch)?;
        let state_file = self.state_path();
        let mut state = PatchState::load(&state_file)?;
        let patch_id = patch.id();

        let recorded = state
            .get(&target.id)
            .is_some_and(|current| current.patch_id == patch_id);
        if !recorded {
            return Err(ProvisionError::NotApplied {
                target: target.id.clone(),
                patch_id,
            });
        }

        let dir = self.target_dir(target);
        self.run_tool(target, &patch_id, &dir, &diff, PatchDirection::Revert, true)?;
        self.run_tool(target, &patch_id, &dir, &diff, PatchDirection::Revert, false)?;

        state.applied.remove(&target.id);
        save_after_tool_run(&state, &state_file, target, &patch_id, "reverted")?;
        tracing::info!("reverted patch '{}' from target '{}'", patch_id, target.id);
        Ok(())
    }

    /// Validates the diff and target directory, returning the diff's
    /// absolute path (the tool runs with `-d <target dir>`).
    fn check_inputs(&self, target: &Target, patch: &PatchSpec) -> Result<PathBuf> {
        let io_error = |reason: String| ProvisionError::PatchIo {
            target: target.id.clone(),
            patch_id: patch.id(),
            reason,
        };

        if patch.target != target.id {
            return Err(io_error(format!(
                "patch belongs to target '{}'",
                patch.target
            )));
        }
        if !patch.file.is_file() {
            return Err(io_error(format!(
                "diff file '{}' not found",
                patch.file.display()
            )));
        }
        let dir = self.target_dir(target);
        if !dir.is_dir() {
            return Err(io_error(format!(
                "target directory '{}' not found; run 'extract' first",
                dir.display()
            )));
        }
        fs::canonicalize(&patch.file).map_err(|e| {
            io_error(format!(
                "resolving diff file '{}': {e}",
                patch.file.display()
            ))
        })
    }

    fn run_tool(
        &self,
        target: &Target,
        patch_id: &str,
        dir: &Path,
        diff: &Path,
        direction: PatchDirection,
        dry_run: bool,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.tool);
        cmd.arg(format!("-p{}", self.strip))
            .arg("--forward")
            .arg("--batch")
            .arg("--no-backup-if-mismatch")
            .arg("--reject-file=-")
            .arg("-d")
            .arg(dir)
            .arg("-i")
            .arg(diff);
        if direction == PatchDirection::Revert {
            cmd.arg("--reverse");
        }
        if dry_run {
            cmd.arg("--dry-run");
        }

        tracing::debug!(
            "running {} ({direction}{}) for target '{}' in '{}'",
            self.tool,
            if dry_run { ", dry run" } else { "" },
            target.id,
            dir.display()
        );
        let output = cmd.output().map_err(|e| ProvisionError::PatchIo {
            target: target.id.clone(),
            patch_id: patch_id.to_string(),
            reason: format!("running '{}': {e}", self.tool),
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ProvisionError::PatchConflict {
            target: target.id.clone(),
            patch: diff.to_path_buf(),
            direction,
            output: format!("{}\n{}", stdout.trim(), stderr.trim())
                .trim()
                .to_string(),
        })
    }
}

/// Records the tool's outcome. A failure here leaves the tree ahead of the
/// state file, so the error says so.
fn save_after_tool_run(
    state: &PatchState,
    state_file: &Path,
    target: &Target,
    patch_id: &str,
    done: &str,
) -> Result<()> {
    state.save(state_file).map_err(|err| ProvisionError::PatchIo {
        target: target.id.clone(),
        patch_id: patch_id.to_string(),
        reason: format!(
            "tree was {done} but the state file '{}' was not updated ({err}); \
             run 'reset-staging' and provision again",
            state_file.display()
        ),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::preflight::command_exists;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    pub(crate) const MAIN_SOURCE: &str = "#include <Wire.h>\n#define SERIAL_BAUD 9600\nvoid setup() {}\n";
    pub(crate) const MAIN_PATCH: &str = "\
--- a/main.ino
+++ b/main.ino
@@ -1,3 +1,3 @@
 #include <Wire.h>
-#define SERIAL_BAUD 9600
+#define SERIAL_BAUD 115200
 void setup() {}
";

    pub(crate) const CAMERA_SOURCE: &str = "#include <WiFi.h>\n#define WIFI_MODE_AP 1\nvoid setup() {}\n";
    pub(crate) const CAMERA_AP_PATCH: &str = "\
--- a/camera.ino
+++ b/camera.ino
@@ -1,3 +1,3 @@
 #include <WiFi.h>
-#define WIFI_MODE_AP 1
+#define WIFI_MODE_AP 2
 void setup() {}
";
    pub(crate) const CAMERA_ROUTER_PATCH: &str = "\
--- a/camera.ino
+++ b/camera.ino
@@ -1,3 +1,4 @@
 #include <WiFi.h>
-#define WIFI_MODE_AP 1
+#define WIFI_MODE_AP 0
+#include \"secrets.h\"
 void setup() {}
--- /dev/null
+++ b/secrets.h.in
@@ -0,0 +1,2 @@
+#define WIFI_SSID \"{{SSID}}\"
+#define WIFI_PASSWORD \"{{PASSWORD}}\"
";

    pub(crate) fn patch_tool_available() -> bool {
        if command_exists(PATCH_COMMAND) {
            return true;
        }
        eprintln!("skipping: host '{PATCH_COMMAND}' tool not installed");
        false
    }

    struct Fixture {
        _tmp: TempDir,
        engine: PatchEngine,
        main: Target,
        camera: Target,
        main_patch: PatchSpec,
        camera_ap: PatchSpec,
        camera_router: PatchSpec,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("Kit");
        fs::create_dir_all(staging.join("main")).unwrap();
        fs::create_dir_all(staging.join("camera")).unwrap();
        fs::write(staging.join("main/main.ino"), MAIN_SOURCE).unwrap();
        fs::write(staging.join("camera/camera.ino"), CAMERA_SOURCE).unwrap();

        let patches = tmp.path().join("patches");
        fs::create_dir_all(&patches).unwrap();
        fs::write(patches.join("main.patch"), MAIN_PATCH).unwrap();
        fs::write(patches.join("camera-ap.patch"), CAMERA_AP_PATCH).unwrap();
        fs::write(patches.join("camera-router.patch"), CAMERA_ROUTER_PATCH).unwrap();

        let target = |id: &str| Target {
            id: id.to_string(),
            path: PathBuf::from(id),
            description: None,
        };
        let spec = |target: &str, variant: Option<&str>, file: &str| PatchSpec {
            target: target.to_string(),
            variant: variant.map(str::to_string),
            file: patches.join(file),
            template: None,
        };

        Fixture {
            engine: PatchEngine::new(&staging, 1),
            main: target("main"),
            camera: target("camera"),
            main_patch: spec("main", None, "main.patch"),
            camera_ap: spec("camera", Some("ap"), "camera-ap.patch"),
            camera_router: spec("camera", Some("router"), "camera-router.patch"),
            _tmp: tmp,
        }
    }

    fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(dir).unwrap().to_path_buf();
                (rel, fs::read(e.path()).unwrap())
            })
            .collect()
    }

    #[test]
    fn apply_then_revert_restores_tree() {
        if !patch_tool_available() {
            return;
        }
        let f = fixture();
        let dir = f.engine.target_dir(&f.camera);
        let before = snapshot(&dir);

        f.engine.apply(&f.camera, &f.camera_router).unwrap();
        assert!(dir.join("secrets.h.in").is_file());
        assert!(fs::read_to_string(dir.join("camera.ino"))
            .unwrap()
            .contains("WIFI_MODE_AP 0"));
        assert_eq!(
            f.engine.applied(&f.camera).unwrap().map(|p| p.patch_id),
            Some("camera-router".to_string())
        );

        f.engine.revert(&f.camera, &f.camera_router).unwrap();
        assert_eq!(snapshot(&dir), before);
        assert_eq!(f.engine.applied(&f.camera).unwrap(), None);
    }

    #[test]
    fn second_apply_is_rejected_from_state() {
        if !patch_tool_available() {
            return;
        }
        let f = fixture();
        f.engine.apply(&f.main, &f.main_patch).unwrap();
        let err = f.engine.apply(&f.main, &f.main_patch).unwrap_err();
        assert!(matches!(err, ProvisionError::AlreadyApplied { .. }));
    }

    #[test]
    fn second_apply_without_state_is_a_conflict() {
        if !patch_tool_available() {
            return;
        }
        let f = fixture();
        f.engine.apply(&f.main, &f.main_patch).unwrap();
        fs::remove_file(f.engine.state_path()).unwrap();

        let patched = fs::read_to_string(f.engine.target_dir(&f.main).join("main.ino")).unwrap();
        let err = f.engine.apply(&f.main, &f.main_patch).unwrap_err();
        assert!(
            matches!(err, ProvisionError::PatchConflict { direction: PatchDirection::Apply, .. }),
            "unexpected error: {err}"
        );
        // The dry run keeps the rejected attempt from touching the tree.
        assert_eq!(
            fs::read_to_string(f.engine.target_dir(&f.main).join("main.ino")).unwrap(),
            patched
        );
    }

    #[test]
    fn opposing_variant_is_a_variant_conflict() {
        if !patch_tool_available() {
            return;
        }
        let f = fixture();
        f.engine.apply(&f.camera, &f.camera_ap).unwrap();
        let err = f.engine.apply(&f.camera, &f.camera_router).unwrap_err();
        match err {
            ProvisionError::VariantConflict {
                applied, requested, ..
            } => {
                assert_eq!(applied, "camera-ap");
                assert_eq!(requested, "camera-router");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn revert_requires_recorded_patch() {
        let f = fixture();
        let err = f.engine.revert(&f.main, &f.main_patch).unwrap_err();
        assert!(matches!(err, ProvisionError::NotApplied { .. }));
    }

    #[test]
    fn revert_of_other_variant_is_not_applied() {
        if !patch_tool_available() {
            return;
        }
        let f = fixture();
        f.engine.apply(&f.camera, &f.camera_ap).unwrap();
        let err = f.engine.revert(&f.camera, &f.camera_router).unwrap_err();
        assert!(matches!(err, ProvisionError::NotApplied { .. }));
        assert_eq!(
            f.engine.applied(&f.camera).unwrap().map(|p| p.patch_id),
            Some("camera-ap".to_string())
        );
    }

    #[test]
    fn missing_inputs_are_patch_io_errors() {
        let f = fixture();
        let mut missing_diff = f.main_patch.clone();
        missing_diff.file = missing_diff.file.with_file_name("absent.patch");
        let err = f.engine.apply(&f.main, &missing_diff).unwrap_err();
        assert!(matches!(err, ProvisionError::PatchIo { .. }));

        let mut gone = f.main.clone();
        gone.path = PathBuf::from("not-extracted");
        let err = f.engine.apply(&gone, &f.main_patch).unwrap_err();
        assert!(matches!(err, ProvisionError::PatchIo { .. }));
        assert!(err.to_string().contains("run 'extract' first"));
    }

    #[test]
    fn patch_for_other_target_is_refused() {
        let f = fixture();
        let err = f.engine.apply(&f.main, &f.camera_ap).unwrap_err();
        assert!(matches!(err, ProvisionError::PatchIo { .. }));
    }

    #[test]
    fn unsaved_state_is_reported_with_tree_status() {
        if !patch_tool_available() {
            return;
        }
        let f = fixture();
        // A non-empty directory at the state path makes the final rename fail.
        let blocker = f.engine.state_path();
        fs::create_dir_all(blocker.join("occupied")).unwrap();

        let err = f.engine.apply(&f.main, &f.main_patch).unwrap_err();
        match &err {
            ProvisionError::PatchIo {
                patch_id, reason, ..
            } => {
                assert_eq!(patch_id, "main");
                assert!(reason.contains("tree was patched"), "{reason}");
                assert!(reason.contains("reset-staging"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fs::read_to_string(f.engine.target_dir(&f.main).join("main.ino"))
            .unwrap()
            .contains("115200"));
    }

    #[test]
    fn missing_tool_error_names_the_patch_id() {
        let f = fixture();
        let engine = f.engine.clone().with_tool("definitely-not-a-patch-tool-12345");
        let err = engine.apply(&f.main, &f.main_patch).unwrap_err();
        match &err {
            ProvisionError::PatchIo {
                patch_id, reason, ..
            } => {
                assert_eq!(patch_id, "main");
                assert!(reason.contains("definitely-not-a-patch-tool-12345"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("patch 'main' for target 'main'"));
        assert_eq!(engine.applied(&f.main).unwrap(), None);
    }
}
