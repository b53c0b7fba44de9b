//! wgwardend: the peer reconciliation daemon.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use core_engine::EngineContext;
use core_engine::scheduler;
use shared_utils::logging::{init_logging, parse_level, LogOptions};
use shared_utils::WardenConfig;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};
use warden_store::{create_pool, PeerStore};
use warden_wg::SystemWgClient;

#[derive(Parser, Debug)]
#[command(
    name = "wgwardend",
    about = "WireGuard peer state reconciliation and quota daemon",
    version
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Also write logs to this directory (daily rotation)
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .map(Into::into)
        .unwrap_or_else(WardenConfig::default_path);
    let config = match WardenConfig::load(&config_path) {
        Ok(config) => config,
        Err(error) => {
            // Logging is not up yet; stderr is all we have here
            eprintln!(
                "could not load config from {}: {error}; using defaults",
                config_path.display()
            );
            WardenConfig::default()
        }
    };

    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    let _log_guard = init_logging(LogOptions {
        level: parse_level(level),
        log_to_file: args.log_dir.is_some(),
        log_dir: args.log_dir.clone().unwrap_or_else(|| "./logs".to_string()),
        ..Default::default()
    });

    info!(
        config = %config_path.display(),
        conf_path = %config.wireguard.conf_path,
        scan_interval_secs = config.engine.scan_interval_secs,
        "wgwardend starting"
    );

    let pool = create_pool(&config.store.database_url)
        .await
        .with_context(|| format!("opening peer store at {}", config.store.database_url))?;
    let store = PeerStore::new(pool);
    let wg = Arc::new(SystemWgClient::new(config.wireguard.command_timeout()));

    let ctx = Arc::new(EngineContext::new(Arc::new(config), store, wg));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler::run(Arc::clone(&ctx), shutdown_rx));

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    // Let an in-flight pass finish before exiting
    let _ = shutdown_tx.send(true);
    if let Err(error) = scheduler_handle.await {
        warn!(%error, "scheduler task did not shut down cleanly");
    }

    info!("wgwardend stopped");
    Ok(())
}
