use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use smartcar_provision::{ProvisionConfig, Provisioner, TerminalPrompt};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "smartcar-provision",
    about = "Fetch, patch and configure vendor robot-car firmware",
    version
)]
struct Cli {
    /// Repository root holding provision.toml and the patch files.
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Config file to use instead of <root>/provision.toml.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the tasks that would run and exit.
    #[arg(long)]
    dry_run: bool,

    /// List the available tasks.
    #[arg(long, conflicts_with = "task")]
    list: bool,

    /// Task to run, e.g. configure-router.
    task: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("smartcar_provision=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let root = resolve_root(cli.root)?;
    let config = match &cli.config {
        Some(path) => ProvisionConfig::load_from(&root, path),
        None => ProvisionConfig::load(&root),
    }
    .with_context(|| format!("loading configuration for '{}'", root.display()))?;

    let mut provisioner = Provisioner::new(config, Box::new(TerminalPrompt::stdio()))
        .context("building task graph")?;

    if cli.list {
        for node in provisioner.graph().nodes() {
            println!("  {:<24} {}", node.name, node.description);
        }
        return Ok(());
    }

    let Some(task) = cli.task else {
        bail!("no task given; run with --list to see the available tasks");
    };

    if cli.dry_run {
        let plan = provisioner.plan(&task)?;
        println!("[plan:{task}] {} task(s):", plan.len());
        for node in plan {
            println!("  {:<24} {}", node.name, node.description);
        }
        return Ok(());
    }

    let ran = provisioner
        .run(&task)
        .with_context(|| format!("running task '{task}'"))?;
    println!("[task:{task}] done ({} task(s) run)", ran.len());
    Ok(())
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir().context("reading current directory")?,
    };
    root.canonicalize()
        .with_context(|| format!("resolving root '{}'", root.display()))
}
