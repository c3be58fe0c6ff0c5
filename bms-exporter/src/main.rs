//! Prometheus exporter for a Modbus RTU battery management system.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bms_common::LoggingConfig;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use bms_exporter::{
    BmsPoller, ExporterConfig, HttpServer, MetricsSink, RegisterSource, RtuTransport,
    SharedMetrics, SimulatedBms,
};

/// Polls a BMS over Modbus RTU and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(name = "bms-exporter")]
#[command(about = "Export BMS cell voltages, current and temperatures as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port path (overrides config).
    #[arg(long)]
    port: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Poll a simulated BMS instead of the serial port.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ExporterConfig::default(),
    };

    if let Some(port) = args.port {
        config.serial.port = port;
    }
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    bms_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting bms-exporter");
    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let listen_addr: SocketAddr = config
        .http
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics: SharedMetrics = Arc::new(MetricsSink::new());

    let poller_task = if args.demo {
        info!("Demo mode: polling a simulated BMS");
        spawn_poller(SimulatedBms::new(), &metrics, &config, shutdown_rx.clone())
    } else {
        let transport = RtuTransport::new(config.serial.clone(), &config.device);
        spawn_poller(transport, &metrics, &config, shutdown_rx.clone())
    };

    // Bind up front so a taken port fails startup.
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", listen_addr))?;
    info!("Prometheus exporter started on {}", listen_addr);

    let http_server = HttpServer::new(metrics.clone(), config.http.path.clone());
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(listener, http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = poller_task.await;
        let _ = http_task.await;
    })
    .await;

    info!(polls = metrics.attempts(), "Exporter stopped");
    Ok(())
}

fn spawn_poller<S: RegisterSource + 'static>(
    source: S,
    metrics: &SharedMetrics,
    config: &ExporterConfig,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let poller = BmsPoller::new(source, metrics.clone(), &config.device);
    tokio::spawn(poller.run(shutdown))
}
