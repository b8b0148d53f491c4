//! docknatd daemon entry point.
//!
//! Parses the command line, loads the configuration, connects to Docker and
//! runs the reconciliation loop until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use docknatd::config::DEFAULT_CONFIG_PATH;
use docknatd::{DockerInspector, DocknatConfig, IptablesCmd, NatMgr};

/// Keeps iptables DNAT rules in sync with Docker published ports
#[derive(Parser, Debug)]
#[command(name = "docknatd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run a single reconciliation cycle and exit
    #[arg(long)]
    once: bool,

    /// Log planned rule changes without applying them
    #[arg(long)]
    dry_run: bool,
}

/// Initialize tracing. `RUST_LOG` overrides the default `info` level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();
}

/// Cancels `shutdown` on the first SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!(error = %e, "Failed to listen for SIGINT");
                }
                info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
        shutdown.cancel();
    });

    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = DocknatConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate().context("invalid configuration")?;

    let dry_run = args.dry_run || config.reconcile.dry_run;
    if dry_run {
        warn!("Dry-run mode, no rules will be changed");
    }

    let inspector = DockerInspector::connect()
        .await
        .context("connecting to Docker")?;
    let mut mgr = NatMgr::new(IptablesCmd::new(), inspector, &config).with_dry_run(dry_run);

    if args.once {
        let report = mgr.reconcile_once().await?;
        info!(
            desired = report.desired,
            actual = report.actual,
            added = report.apply.added,
            removed = report.apply.removed,
            failed = report.apply.failed,
            "Single cycle complete"
        );
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;
    mgr.run(shutdown).await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    info!(config = %args.config.display(), "--- Starting docknatd ---");

    match run(args).await {
        Ok(()) => {
            info!("docknatd exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("docknatd error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
