// Master Exporter - Prometheus exporter for home-lab sources
//
// Periodically probes several external systems and republishes their
// current values as Prometheus gauges on a single /metrics endpoint.
//
// # Sources
// - OpenWeatherMap current weather (metered API)
// - SABnzbd queue and server statistics
// - Netgear smart switches via NSDP broadcast discovery
// - ICMP reachability and round-trip times
// - DNS resolution times
//
// # Usage
// master-exporter --config <path> [--port <port>] [--once]
//
// Example:
// master-exporter --config /etc/master-exporter.json

use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Module declarations
mod apiclient;
mod config;
mod exposition;
mod nsdp;
mod numeric;
mod quota;
mod registry;
mod scheduler;
mod sources;
#[cfg(test)]
mod testutil;

use apiclient::HttpApiClient;
use config::AppConfig;
use exposition::MetricsBackend;
use scheduler::MetricScheduler;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "master-exporter", version, about = "Prometheus exporter for home-lab sources")]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "MASTER_EXPORTER_CONFIG", default_value = "master-exporter.json")]
    config: PathBuf,

    /// Port of the /metrics endpoint; overrides `base_port`
    #[arg(long)]
    port: Option<u16>,

    /// Scrape every source once, print the exposition and exit
    #[arg(long)]
    once: bool,
}

/// Application entry point
///
/// This function:
/// 1. Initializes logging and parses arguments
/// 2. Loads and validates the configuration
/// 3. Builds the enabled sources and primes them (fatal on failure)
/// 4. Serves /metrics and runs the scheduler until Ctrl+C
#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();

    info!("=== Master Exporter Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.base_port = port;
    }

    let backend = MetricsBackend::new();
    let api = HttpApiClient::new(&config.api_client).context("Failed to create HTTP client")?;

    let sources = sources::build_enabled(&config, &backend, Arc::new(api))
        .await
        .context("Failed to construct sources")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scheduler = MetricScheduler::new(backend.clone(), shutdown_rx.clone());
    for source in sources {
        scheduler.add(source);
    }
    info!("Created {} source(s)", scheduler.len());

    scheduler
        .prime()
        .await
        .context("Start-up scrape failed")?;

    if args.once {
        print!("{}", backend.render().context("Failed to encode metrics")?);
        return Ok(());
    }

    let listener = exposition::bind(config.base_port)
        .await
        .with_context(|| format!("Failed to bind metrics endpoint on port {}", config.base_port))?;
    let server = tokio::spawn(exposition::serve(listener, backend, shutdown_rx));

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    info!("=== Master Exporter Started Successfully ===");
    info!("Press Ctrl+C to stop");

    if scheduler.is_empty() {
        warn!("No sources to schedule; serving an empty metrics set");
    }
    scheduler.start().await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics endpoint failed: {}", e),
        Err(e) => error!("Metrics endpoint task failed: {}", e),
    }

    info!("=== Master Exporter Stopped ===");
    Ok(())
}

/// Resolves on Ctrl+C, or on SIGTERM when running on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initializes the logging subsystem
///
/// Sets up structured logging with:
/// - Colored, human-readable output when running in a terminal
/// - JSON output when running as a systemd service
///
/// # Log Levels
/// Default: INFO
/// Can be overridden with RUST_LOG environment variable
///
/// # Examples
/// ```bash
/// RUST_LOG=debug master-exporter --config exporter.json
/// RUST_LOG=master_exporter::sources=debug,info master-exporter
/// ```
fn init_logging() {
    // Systemd sets INVOCATION_ID for every unit it starts
    let is_systemd = env::var("INVOCATION_ID").is_ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if is_systemd {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    }
}
