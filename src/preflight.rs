//! Preflight checks for host tools.
//!
//! Patching and zip extraction shell out to host tools. Checking for them
//! before a run starts keeps a missing tool from surfacing halfway through
//! the task graph.
//!
//! # Example
//!
//! ```rust
//! use smartcar_provision::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("patch") {
//!     println!("GNU patch not installed");
//! }
//!
//! let tools = &[("patch", "patch"), ("unzip", "unzip")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use crate::error::{ProvisionError, Result};

/// Tool used by the patch engine.
pub const PATCH_TOOL: (&str, &str) = ("patch", "patch");

/// Tool used to unpack `.zip` archives.
pub const UNZIP_TOOL: (&str, &str) = ("unzip", "unzip");

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is (command_name, package_name). Fails with the full list of
/// missing tools and the packages providing them.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    let msg = missing
        .iter()
        .map(|(t, p)| format!("  {} (install: {})", t, p))
        .collect::<Vec<_>>()
        .join("\n");
    Err(ProvisionError::MissingTools(msg))
}
