//! Provisioning pipeline for vendor robot-car firmware.
//!
//! Turns a vendor firmware archive into a build-ready source tree:
//!
//! - **Fetch** - download the archive once and unpack it into a staging tree
//! - **Patch** - apply or revert per-target unified diffs, one networking
//!   variant per target at a time, with the outcome recorded on disk
//! - **Templates** - render credential headers from operator input
//! - **Tasks** - a named task graph with prerequisites, run once per invocation
//! - **Reset** - discard the staging tree or the whole workspace
//!
//! # Architecture
//!
//! ```text
//! provision.toml ──► ProvisionConfig
//!                        │
//!                        ▼
//!              Provisioner (tasks) ──► TaskGraph<Step>
//!                        │
//!      ┌─────────┬───────┼──────────┬───────────┐
//!      ▼         ▼       ▼          ▼           ▼
//!    fetch     patch  template    reset     workspace lock
//!              state   prompt
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use smartcar_provision::{FixedCredentials, ProvisionConfig, Provisioner};
//!
//! let config = ProvisionConfig::load(Path::new("."))?;
//! let credentials = FixedCredentials::new([("SSID", "home-net"), ("PASSWORD", "s3cr3t")]);
//! let mut provisioner = Provisioner::new(config, Box::new(credentials))?;
//! provisioner.run("configure-router")?;
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub(crate) mod paths;
pub mod patch;
pub mod preflight;
pub mod prompt;
pub mod reset;
pub mod tasks;
pub mod template;
pub mod workspace;

// Re-exports for convenience
pub use config::{ArchiveDescriptor, ProvisionConfig, CONFIG_FILENAME};
pub use error::{ProvisionError, Result};
pub use fetch::{ensure_archive, ensure_extracted};
pub use patch::PatchEngine;
pub use prompt::{CredentialSource, FixedCredentials, TerminalPrompt};
pub use reset::{reset_all, reset_staging};
pub use tasks::{Provisioner, Step, TaskGraph, TaskNode};
pub use template::{render, Marker};
