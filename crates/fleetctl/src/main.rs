//! fleetctl: operator CLI for the fleet orchestrator.
//!
//! Loads the policy config and a topology document, opens the status
//! database, and runs one orchestrator operation.
//!
//! # Usage
//!
//! ```text
//! fleetctl --topology topology.json --data-dir /var/lib/fleet suspend h1.example.com
//! fleetctl suspend-group --parent dom0.example.com h1.example.com h2.example.com
//! fleetctl suspend-app music:prod
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use fleet_lock::LocalLockService;
use fleet_model::{ApplicationInstanceReference, HostName, NodeGroup};
use fleet_orchestrator::{FileTopologySource, FleetConfig, Orchestrator, PolicyOrchestrator};
use fleet_state::StatusDb;

#[derive(Debug, Parser)]
#[command(name = "fleetctl", about = "Fleet maintenance orchestrator")]
struct Cli {
    /// Policy configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Topology document (JSON).
    #[arg(long, global = true, default_value = "topology.json")]
    topology: PathBuf,

    /// Directory holding the status database.
    #[arg(long, global = true, default_value = "/var/lib/fleet")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Allow a host to go down for maintenance.
    Suspend { host: String },

    /// Return a host to service.
    Resume { host: String },

    /// Suspend several hosts under one parent as a single decision.
    SuspendGroup {
        /// Parent host the group belongs to.
        #[arg(long)]
        parent: String,

        #[arg(required = true)]
        hosts: Vec<String>,
    },

    /// Approve a host for permanent removal.
    PermitRemoval { host: String },

    /// Show a host's status and the services it runs.
    Host { host: String },

    /// Suspend a whole application (`tenant:instance`).
    SuspendApp { application: String },

    /// Resume a whole application (`tenant:instance`).
    ResumeApp { application: String },

    /// Show an application's status.
    AppStatus { application: String },

    /// List suspended applications.
    SuspendedApps,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,fleetctl=debug,fleet_orchestrator=debug")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = run(cli).await?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

/// Assemble the orchestrator and run one command, returning what to print.
async fn run(cli: Cli) -> anyhow::Result<String> {
    let config = load_config(cli.config.as_deref())?;

    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("creating {}", cli.data_dir.display()))?;
    let db_path = cli.data_dir.join("fleet.redb");
    let store = Arc::new(StatusDb::open(&db_path)?);
    debug!(path = ?db_path, "status database opened");

    let orchestrator = PolicyOrchestrator::new(
        Arc::new(FileTopologySource::new(&cli.topology)),
        store,
        Arc::new(LocalLockService::new()),
        &config,
    )?;

    execute(&orchestrator, cli.command).await
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    match path {
        Some(path) => {
            let config = FleetConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?;
            info!(path = %path.display(), "config loaded");
            Ok(config)
        }
        None => Ok(FleetConfig::default()),
    }
}

async fn execute(orchestrator: &dyn Orchestrator, command: Command) -> anyhow::Result<String> {
    let output = match command {
        Command::Suspend { host } => {
            orchestrator.suspend(&HostName::new(host.as_str())).await?;
            format!("{host}: suspended")
        }
        Command::Resume { host } => {
            orchestrator.resume(&HostName::new(host.as_str())).await?;
            format!("{host}: resumed")
        }
        Command::SuspendGroup { parent, hosts } => {
            let group = NodeGroup::new(HostName::new(parent), hosts.into_iter().map(HostName::new));
            orchestrator.suspend_group(&group).await?;
            format!("{}: {} host(s) suspended", group.parent(), group.len())
        }
        Command::PermitRemoval { host } => {
            orchestrator
                .acquire_permission_to_remove(&HostName::new(host.as_str()))
                .await?;
            format!("{host}: approved for removal")
        }
        Command::Host { host } => {
            let info = orchestrator.get_host(&HostName::new(host)).await?;
            serde_json::to_string_pretty(&info)?
        }
        Command::SuspendApp { application } => {
            let application = ApplicationInstanceReference::parse(&application)?;
            orchestrator.suspend_application(&application).await?;
            format!("{application}: suspended")
        }
        Command::ResumeApp { application } => {
            let application = ApplicationInstanceReference::parse(&application)?;
            orchestrator.resume_application(&application).await?;
            format!("{application}: resumed")
        }
        Command::AppStatus { application } => {
            let application = ApplicationInstanceReference::parse(&application)?;
            let status = orchestrator.application_status(&application).await?;
            format!("{application}: {status}")
        }
        Command::SuspendedApps => orchestrator
            .suspended_applications()
            .await
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"),
    };
    Ok(output)
}
