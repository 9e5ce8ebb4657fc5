//! Error taxonomy for the provisioning pipeline.
//!
//! Every failure surfaces to the operator; nothing here is retried. The
//! orchestrator wraps component errors in [`ProvisionError::Task`] so the
//! failing task name is part of the message.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Direction a diff is being run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchDirection {
    Apply,
    Revert,
}

impl fmt::Display for PatchDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchDirection::Apply => write!(f, "apply"),
            PatchDirection::Revert => write!(f, "revert"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Archive download or copy failed.
    #[error("fetching '{url}' into '{}': {reason}", .path.display())]
    Fetch {
        url: String,
        path: PathBuf,
        reason: String,
    },

    /// Archive could not be unpacked.
    #[error("extracting '{}': {reason}", .archive.display())]
    Extract { archive: PathBuf, reason: String },

    /// The diff tool rejected the patch.
    #[error(
        "patch '{}' does not {direction} cleanly to target '{target}':\n{output}",
        .patch.display()
    )]
    PatchConflict {
        target: String,
        patch: PathBuf,
        direction: PatchDirection,
        output: String,
    },

    /// Diff file or target directory missing.
    #[error("patch '{patch_id}' for target '{target}': {reason}")]
    PatchIo {
        target: String,
        patch_id: String,
        reason: String,
    },

    #[error("patch '{patch_id}' is already applied to target '{target}'")]
    AlreadyApplied { target: String, patch_id: String },

    #[error("patch '{patch_id}' is not applied to target '{target}'")]
    NotApplied { target: String, patch_id: String },

    #[error(
        "target '{target}' has patch '{applied}' applied; revert it before applying '{requested}'"
    )]
    VariantConflict {
        target: String,
        applied: String,
        requested: String,
    },

    /// Template absent, which means the patch introducing it has not run.
    #[error("template '{}' not found; run '{prerequisite}' first", .path.display())]
    TemplateNotFound { path: PathBuf, prerequisite: String },

    #[error("unknown task '{name}'; available tasks: {available}")]
    UnknownTask { name: String, available: String },

    #[error("missing required host tools:\n{0}")]
    MissingTools(String),

    #[error("invalid task graph: {0}")]
    Graph(String),

    #[error("invalid configuration '{}': {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    #[error("workspace '{}' is in use by another invocation", .path.display())]
    Locked { path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("task '{task}' failed")]
    Task {
        task: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    /// The innermost error, skipping task-name wrappers.
    pub fn root_cause(&self) -> &ProvisionError {
        let mut current = self;
        while let ProvisionError::Task { source, .. } = current {
            current = source.as_ref();
        }
        current
    }

    /// Name of the outermost failing task, if the error came from a task run.
    pub fn task(&self) -> Option<&str> {
        match self {
            ProvisionError::Task { task, .. } => Some(task),
            _ => None,
        }
    }
}

/// Builds a `map_err` adapter that attaches context to an I/O error.
pub(crate) fn io_context(context: impl Into<String>) -> impl FnOnce(io::Error) -> ProvisionError {
    let context = context.into();
    move |source| ProvisionError::Io { context, source }
}
