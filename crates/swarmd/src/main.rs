//! swarmd: the SwarmGrid daemon.
//!
//! Single binary that assembles the coordinator:
//! - Device registry, work-stealing scheduler, join codes
//! - Maintenance loop (stale sweep, reaper, rebalance, code cleanup)
//! - Connection hub for device sockets
//! - REST API + device WebSocket
//!
//! # Usage
//!
//! ```text
//! swarmd serve --port 8080 --config /etc/swarmgrid/swarm.toml
//! swarmd config > swarm.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swarmgrid_api::{ApiState, ConnectionHub};
use swarmgrid_coordinator::maintenance::{self, MaintenanceSchedule};
use swarmgrid_coordinator::{SwarmCoordinator, SwarmHandle};
use swarmgrid_core::SwarmConfig;

const DEFAULT_LOG_FILTER: &str = "info,swarmd=debug,swarmgrid=debug";

#[derive(Parser)]
#[command(name = "swarmd", about = "SwarmGrid coordinator daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator and its HTTP surface.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// TOML configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the default configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Serve { port, config } => run_serve(port, config).await,
        Command::Config => {
            print!("{}", SwarmConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<SwarmConfig> {
    match path {
        Some(path) => {
            let config = SwarmConfig::from_file(&path)?;
            info!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => {
            info!("no configuration file given, using defaults");
            Ok(SwarmConfig::default())
        }
    }
}

async fn run_serve(port: u16, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    info!("SwarmGrid daemon starting");

    let config = load_config(config_path)?;

    // ── Initialize subsystems ──────────────────────────────────

    let coordinator = SwarmCoordinator::from_config(&config);
    let (swarm, outbound_rx) = SwarmHandle::channel(coordinator);
    info!(
        push_enabled = config.coordinator.push_enabled,
        require_join_code = config.coordinator.require_join_code,
        "coordinator initialized"
    );

    let hub = ConnectionHub::new();
    let schedule = MaintenanceSchedule::from_config(&config);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let hub_handle = tokio::spawn(hub.clone().run(outbound_rx, shutdown_rx.clone()));
    let maintenance_handle = tokio::spawn(maintenance::run(swarm.clone(), schedule, shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = swarmgrid_api::build_router(ApiState::new(swarm, hub));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = hub_handle.await;
    let _ = maintenance_handle.await;

    info!("SwarmGrid daemon stopped");
    Ok(())
}
