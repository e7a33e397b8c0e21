//! droverd - The drover daemon
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization
//! - One state driver per configured entity type
//! - Signal-driven shutdown

use anyhow::{Context, Result};
use clap::Parser;
use drover_config::load_config;
use drover_store::{SqliteStore, Store};
use drover_util::default_config_path;
use droverd::Daemon;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// droverd - Drives named state machines through timeouts and events
#[derive(Parser, Debug)]
#[command(name = "droverd")]
#[command(about = "Drives named state machines through timeouts and events", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/drover/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set DROVER_DATA_DIR env var)
    #[arg(short, long, env = "DROVER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn open_daemon(args: &Args) -> Result<Daemon> {
    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    info!(
        config_path = %args.config.display(),
        machines = config.machines.len(),
        "Configuration loaded"
    );

    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| config.server.data_dir.clone());
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    let db_path = data_dir.join("drover.db");
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {:?}", db_path))?,
    );
    info!(db_path = %db_path.display(), "Store initialized");

    for spec in &config.machines {
        match store.list_entities(&spec.entity_type) {
            Ok(names) => info!(entity_type = %spec.entity_type, entities = names.len(), "Machine type loaded"),
            Err(e) => warn!(entity_type = %spec.entity_type, error = %e, "Failed to count entities"),
        }
    }

    Daemon::new(config, store).context("Failed to build drivers")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "droverd starting");

    let daemon = Arc::new(open_daemon(&args)?);
    daemon.start().context("Failed to start drivers")?;

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    info!("Service running");

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
        _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
    }

    // Stopping joins driver threads; keep that off the async workers
    let stopping = daemon.clone();
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("Shutdown task failed")?;

    info!("droverd stopped");
    Ok(())
}
