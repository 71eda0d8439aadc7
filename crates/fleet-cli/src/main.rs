//! Fleet - package experiment daemon
//!
//! Usage:
//!   fleet run                   # Run the daemon, reading remote requests from stdin
//!   fleet state                 # Show installed package versions
//!   fleet start-experiment ...  # Direct lifecycle operations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet_core::prelude::*;
use fleet_core::remote::LocalRemoteClient;

#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Package experiment daemon", long_about = None)]
struct Cli {
    /// Path to fleet.toml (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    ///
    /// Remote requests are read from stdin, one JSON object per line. Every
    /// published state snapshot is printed to stdout as JSON.
    Run {
        /// Catalog JSON file loaded before reading requests
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Install a package from a URL
    Install {
        url: String,
        /// Extra arguments passed to the installer
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Start an experiment from a package URL
    StartExperiment { url: String },

    /// Stop the running experiment of a package
    StopExperiment { package: String },

    /// Promote the running experiment of a package to stable
    PromoteExperiment { package: String },

    /// Show installed package versions
    State {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Look up a package in a catalog for this platform
    Package {
        name: String,
        version: String,
        /// Catalog JSON file
        #[arg(long)]
        catalog: PathBuf,
    },

    /// Show whether APM injection is active on this host
    ApmStatus {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config)?;
    if matches!(cli.command, Commands::Run { .. }) {
        config = foreground_config(config);
    }
    let remote = LocalRemoteConfig::new();
    let daemon = build_daemon(config, remote.clone());

    match cli.command {
        Commands::Run { catalog } => run_daemon(&daemon, remote.client(), catalog).await?,
        Commands::Install { url, args } => daemon.install(&url, &args).await?,
        Commands::StartExperiment { url } => daemon.start_experiment(&url).await?,
        Commands::StopExperiment { package } => daemon.stop_experiment(&package).await?,
        Commands::PromoteExperiment { package } => daemon.promote_experiment(&package).await?,
        Commands::State { format } => {
            let states = daemon.get_state().await?;
            match format {
                OutputFormat::Table => print_state_table(&states),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&states)?),
            }
        }
        Commands::Package {
            name,
            version,
            catalog,
        } => {
            daemon.update_catalog(read_catalog(&catalog)?).await;
            let package = daemon.get_package(&name, &version).await?;
            println!("{}", serde_json::to_string_pretty(&package)?);
        }
        Commands::ApmStatus { format } => {
            let status = daemon.get_apm_injection_status().await?;
            match format {
                OutputFormat::Table => print_apm_status(&status),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<DaemonConfig> {
    let store = match path {
        Some(path) => ConfigStore::from_path(path),
        None => ConfigStore::from_default_location()?,
    };
    let mut config = store.load()?;
    config.apply_env_overrides()?;
    Ok(config)
}

/// Foreground mode is driven through the local transport, so it is always
/// started regardless of `remote_updates`.
fn foreground_config(mut config: DaemonConfig) -> DaemonConfig {
    if !config.remote_updates {
        info!("Enabling the local remote transport for foreground mode");
        config.remote_updates = true;
    }
    config
}

fn build_daemon(config: DaemonConfig, remote: LocalRemoteConfig) -> Daemon {
    let installer = Arc::new(ExecInstaller::new(config.installer_bin()));
    Daemon::builder(installer.clone(), installer, Arc::new(remote))
        .config(config)
        .build()
}

fn read_catalog(path: &Path) -> Result<Catalog> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
    Catalog::from_slice(&content)
}

async fn run_daemon(
    daemon: &Daemon,
    client: LocalRemoteClient,
    catalog: Option<PathBuf>,
) -> Result<()> {
    let mut updates = client.subscribe();
    let (done_tx, mut done_rx) = tokio::sync::oneshot::channel::<()>();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    print_snapshot(&updates.borrow_and_update());
                }
                _ = &mut done_rx => {
                    if updates.has_changed().unwrap_or(false) {
                        print_snapshot(&updates.borrow_and_update());
                    }
                    return;
                }
            }
        }
    });

    daemon.start().await?;
    if let Some(path) = catalog {
        daemon.update_catalog(read_catalog(&path)?).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let request: RemoteApiRequest = match serde_json::from_str(&line) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Ignoring malformed request: {}", e);
                        continue;
                    }
                };
                if let Err(e) = client.push_request(request).await {
                    warn!("Could not schedule request: {}", e);
                }
            }
        }
    }

    daemon.stop().await?;
    let _ = done_tx.send(());
    printer.await.context("State printer failed")?;
    Ok(())
}

fn print_snapshot(snapshot: &[PackageState]) {
    match serde_json::to_string(snapshot) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("could not encode state: {}", e),
    }
}

fn print_state_table(states: &std::collections::BTreeMap<String, PackageVersions>) {
    if states.is_empty() {
        println!("No packages installed.");
        return;
    }

    println!("{:<30} {:<20} Experiment", "Package", "Stable");
    println!("{}", "-".repeat(70));

    for (package, versions) in states {
        let experiment = if versions.has_experiment() {
            versions.experiment.as_str()
        } else {
            "-"
        };
        println!("{:<30} {:<20} {}", package, versions.stable, experiment);
    }
}

fn print_apm_status(status: &ApmInjectionStatus) {
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("{:<22} {}", "Host instrumented", yes_no(status.host_instrumented));
    println!("{:<22} {}", "Docker installed", yes_no(status.docker_installed));
    println!(
        "{:<22} {}",
        "Docker instrumented",
        yes_no(status.docker_instrumented)
    );
}
