//! Partyline Server - standalone headless server for the Partyline relay.
//!
//! Runs the relay hub and its HTTP/WebSocket transport as a background
//! daemon, with no GUI attached.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use partyline_core::api::{start_server, AppState};
use partyline_core::bootstrap_hub;
use tokio::signal;

use crate::config::ServerConfig;

/// Partyline Server - headless local-area audio relay.
#[derive(Parser, Debug)]
#[command(name = "partyline-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "PARTYLINE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "PARTYLINE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Partyline Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }

    log::info!(
        "Configuration: port={}, maxPacketsPerSec={}, historyMax={}",
        config.port,
        config.max_packets_per_sec,
        config.history_max
    );

    let bootstrapped = bootstrap_hub(config.to_hub_config()).context("Failed to bootstrap hub")?;
    log::info!("Hub bootstrapped successfully");

    let app_state = AppState::new(
        bootstrapped.hub.clone(),
        bootstrapped.event_bridge.clone(),
        std::sync::Arc::new(bootstrapped.hub.config().clone()),
    );

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP/WebSocket server started on port {}", config.port);

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    bootstrapped.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
