//! Aircast Server - standalone headless bridge.
//!
//! Discovers cast receivers and UPnP renderers, assigns each a stream port,
//! advertises them to AirPlay senders and starts playback on stream-ready
//! signals from the HTTP control API.

mod config;

use std::path::PathBuf;

use aircast_core::bootstrap_services;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;

/// Aircast Server - AirPlay bridge for cast receivers and UPnP renderers.
#[derive(Parser, Debug)]
#[command(name = "aircast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "AIRCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Control API port, 0 to disable (overrides config file).
    #[arg(short = 'p', long, env = "AIRCAST_API_PORT")]
    port: Option<u16>,

    /// Advertise IP address (overrides config file).
    #[arg(short = 'a', long, env = "AIRCAST_ADVERTISE_IP")]
    advertise_ip: Option<std::net::IpAddr>,

    /// Do not publish sinks as AirPlay receivers.
    #[arg(long)]
    no_raop: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Aircast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.api_port = port;
    }
    if let Some(ip) = args.advertise_ip {
        config.advertise_ip = Some(ip);
    }
    if args.no_raop {
        config.advertise_raop = false;
    }

    log::info!(
        "Configuration: api_port={}, ports={}-{}, advertise_ip={}",
        config.api_port,
        config.min_port,
        config.max_port,
        config
            .advertise_ip
            .map_or_else(|| "auto".to_string(), |ip| ip.to_string())
    );

    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config).context(
        "Failed to bootstrap services. If local IP detection failed, \
         specify --advertise-ip or set AIRCAST_ADVERTISE_IP to an address \
         the sinks can reach.",
    )?;

    log::info!("Services bootstrapped successfully");

    services.start_background_tasks();

    log::info!(
        "Background tasks started (discovery: {})",
        services.source_names().join(", ")
    );

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed, that signal is ignored and the other
/// still triggers shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
