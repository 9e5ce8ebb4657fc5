//! Provisioning tasks and the runner that executes them.
//!
//! [`Provisioner::run`] resolves a task's plan, checks that the host tools the
//! plan needs are installed, takes the workspace lock and runs each node in
//! order. Fetch and extract are idempotent through the filesystem; patch and
//! unpatch tasks consult the recorded patch state and skip when the target is
//! already in the requested state, so re-running a task never redoes its
//! prerequisites' work.

pub mod catalog;
pub mod graph;

use std::collections::BTreeSet;
use std::fs;

use crate::config::{ArchiveFormat, PatchSpec, ProvisionConfig, Target, TemplateField};
use crate::error::{io_context, ProvisionError, Result};
use crate::fetch::{ensure_archive, ensure_extracted, ExtractOutcome, FetchOutcome};
use crate::patch::PatchEngine;
use crate::preflight::{check_required_tools, PATCH_TOOL, UNZIP_TOOL};
use crate::prompt::CredentialSource;
use crate::reset::{reset_all, reset_staging, ResetOutcome};
use crate::template::render;
use crate::workspace::WorkspaceLock;

pub use catalog::{build_catalog, Step};
pub use graph::{TaskGraph, TaskNode};

pub struct Provisioner {
    config: ProvisionConfig,
    graph: TaskGraph<Step>,
    engine: PatchEngine,
    credentials: Box<dyn CredentialSource>,
}

impl Provisioner {
    pub fn new(config: ProvisionConfig, credentials: Box<dyn CredentialSource>) -> Result<Self> {
        let graph = build_catalog(&config)?;
        let engine = PatchEngine::from_config(&config);
        Ok(Self {
            config,
            graph,
            engine,
            credentials,
        })
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    pub fn graph(&self) -> &TaskGraph<Step> {
        &self.graph
    }

    /// The nodes `task` would run, in order, without touching anything.
    pub fn plan(&self, task: &str) -> Result<Vec<&TaskNode<Step>>> {
        self.graph.plan(task)
    }

    /// Runs `task` and its prerequisites. Returns the names of the tasks run.
    pub fn run(&mut self, task: &str) -> Result<Vec<String>> {
        let plan = self.graph.plan(task)?;
        let tools = self.required_tools(&plan);
        if !tools.is_empty() {
            check_required_tools(&tools)?;
        }

        let _lock = WorkspaceLock::acquire(&self.config.workspace)?;
        tracing::debug!(
            "running '{}': {}",
            task,
            plan.iter()
                .map(|n| n.name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        let Self {
            config,
            graph,
            engine,
            credentials,
        } = self;
        graph.run(task, |node| execute(node, config, engine, &mut **credentials))
    }

    fn required_tools(&self, plan: &[&TaskNode<Step>]) -> Vec<(&'static str, &'static str)> {
        let mut tools = Vec::new();
        let patches = plan
            .iter()
            .any(|n| matches!(n.action, Step::Patch(_) | Step::Unpatch(_)));
        let unzip = plan.iter().any(|n| n.action == Step::Extract)
            && self.config.archive.format == ArchiveFormat::Zip
            && !self.config.staging_dir().exists();
        if patches {
            tools.push(PATCH_TOOL);
        }
        if unzip {
            tools.push(UNZIP_TOOL);
        }
        tools
    }
}

fn execute(
    node: &TaskNode<Step>,
    config: &ProvisionConfig,
    engine: &PatchEngine,
    credentials: &mut dyn CredentialSource,
) -> Result<()> {
    let tag = &node.name;
    match &node.action {
        Step::FetchArchive => match ensure_archive(&config.archive, &config.workspace)? {
            FetchOutcome::Downloaded => {
                println!("[task:{tag}] downloaded {}", config.archive_path().display())
            }
            FetchOutcome::AlreadyPresent => {
                println!("[task:{tag}] archive already present, skipping download")
            }
        },
        Step::Extract => match ensure_extracted(&config.archive, &config.workspace)? {
            ExtractOutcome::Extracted => {
                println!("[task:{tag}] extracted to {}", config.staging_dir().display())
            }
            ExtractOutcome::AlreadyExtracted => {
                println!("[task:{tag}] staging tree already present, skipping extraction")
            }
        },
        Step::Patch(id) => {
            let (target, patch) = lookup(config, id)?;
            match engine.applied(target)? {
                Some(current) if current.patch_id == *id => {
                    println!("[task:{tag}] '{id}' already applied to '{}'", target.id)
                }
                _ => {
                    engine.apply(target, patch)?;
                    println!("[task:{tag}] applied '{id}' to '{}'", target.id);
                }
            }
        }
        Step::Unpatch(id) => {
            let (target, patch) = lookup(config, id)?;
            match engine.applied(target)? {
                Some(current) if current.patch_id == *id => {
                    engine.revert(target, patch)?;
                    println!("[task:{tag}] reverted '{id}' from '{}'", target.id);
                    remove_rendered_output(tag, config, target, patch)?;
                }
                _ => println!("[task:{tag}] '{id}' not applied to '{}'", target.id),
            }
        }
        Step::Configure { variant, patches } => {
            configure(tag, variant, patches, config, credentials)?
        }
        Step::Status => print_status(tag, config, engine)?,
        Step::ResetStaging => match reset_staging(&config.archive, &config.workspace)? {
            ResetOutcome::Removed => println!("[task:{tag}] staging tree removed"),
            ResetOutcome::AlreadyClean => println!("[task:{tag}] nothing to remove"),
        },
        Step::ResetAll => match reset_all(&config.archive, &config.workspace)? {
            ResetOutcome::Removed => println!("[task:{tag}] staging tree and archive removed"),
            ResetOutcome::AlreadyClean => println!("[task:{tag}] nothing to remove"),
        },
    }
    Ok(())
}

fn lookup<'a>(config: &'a ProvisionConfig, patch_id: &str) -> Result<(&'a Target, &'a PatchSpec)> {
    let patch = config
        .patch(patch_id)
        .ok_or_else(|| ProvisionError::Graph(format!("no patch with id '{patch_id}'")))?;
    let target = config.target(&patch.target).ok_or_else(|| {
        ProvisionError::Graph(format!(
            "patch '{patch_id}' references unknown target '{}'",
            patch.target
        ))
    })?;
    Ok((target, patch))
}

/// Deletes credentials rendered from a template the reverted patch introduced.
fn remove_rendered_output(
    tag: &str,
    config: &ProvisionConfig,
    target: &Target,
    patch: &PatchSpec,
) -> Result<()> {
    let Some(template) = &patch.template else {
        return Ok(());
    };
    let output = config.target_dir(target).join(&template.output);
    if !output.exists() {
        return Ok(());
    }
    fs::remove_file(&output).map_err(io_context(format!(
        "removing rendered credentials '{}'",
        output.display()
    )))?;
    println!("[task:{tag}] removed {}", output.display());
    Ok(())
}

fn configure(
    tag: &str,
    variant: &str,
    patch_ids: &[String],
    config: &ProvisionConfig,
    credentials: &mut dyn CredentialSource,
) -> Result<()> {
    let mut templated = Vec::new();
    for id in patch_ids {
        let (target, patch) = lookup(config, id)?;
        if let Some(template) = &patch.template {
            templated.push((id.as_str(), target, template));
        }
    }

    if templated.is_empty() {
        println!(
            "[task:{tag}] {} target(s) configured for '{variant}', no credentials needed",
            patch_ids.len()
        );
        return Ok(());
    }

    // Ask for each field once even when several templates share it.
    let mut names = BTreeSet::new();
    let fields: Vec<TemplateField> = templated
        .iter()
        .flat_map(|(_, _, template)| template.fields.iter())
        .filter(|field| names.insert(field.name.clone()))
        .cloned()
        .collect();
    let tokens = credentials.collect(&fields)?;

    for (id, target, template) in templated {
        let dir = config.target_dir(target);
        let output = dir.join(&template.output);
        let report = render(
            &dir.join(&template.source),
            &tokens,
            &output,
            &config.marker,
            &catalog::patch_task(id),
        )?;
        println!(
            "[task:{tag}] wrote {} ({} substitutions)",
            output.display(),
            report.substitutions
        );
    }
    Ok(())
}

fn print_status(tag: &str, config: &ProvisionConfig, engine: &PatchEngine) -> Result<()> {
    let presence = |exists: bool| if exists { "present" } else { "absent" };
    let archive = config.archive_path();
    let staging = config.staging_dir();
    println!(
        "[task:{tag}] archive {}: {}",
        archive.display(),
        presence(archive.is_file())
    );
    println!(
        "[task:{tag}] staging {}: {}",
        staging.display(),
        presence(staging.is_dir())
    );
    for target in &config.targets {
        let applied = engine.applied(target)?;
        println!(
            "[task:{tag}]   {:<12} {}",
            target.id,
            applied
                .map(|p| format!("{} (applied {})", p.patch_id, p.applied_at_utc))
                .unwrap_or_else(|| "unpatched".to_string())
        );
    }
    Ok(())
}
