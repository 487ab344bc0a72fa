//! Data Service Dispatcher
//!
//! This binary serves the dispatcher RPC surface over gRPC: dataset and job
//! registration, worker heartbeats, and distributed snapshots.
//!
//! # Usage
//!
//! ```bash
//! # Start dispatcher with default settings
//! dsd-dispatcher
//!
//! # Start with custom port and a work directory for snapshot recovery
//! dsd-dispatcher --port 50052 --work-dir /var/lib/dsd
//!
//! # Start with configuration file
//! dsd-dispatcher --config dispatcher.toml
//! ```

mod service;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dispatcher_core::proto::dispatcher_service_server::DispatcherServiceServer;
use dispatcher_core::{Dispatcher, DispatcherConfig};
use service::DispatcherServiceImpl;

/// Data Service Dispatcher
#[derive(Parser, Debug)]
#[command(name = "dsd-dispatcher")]
#[command(about = "Dispatcher service for distributed dataset processing and snapshots")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "50051")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    address: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker timeout in seconds (overrides the config file)
    #[arg(long)]
    worker_timeout: Option<u64>,

    /// Directory for state that must survive restarts
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => DispatcherConfig::from_file(path)?,
        None => DispatcherConfig::default(),
    }
    .with_env_overrides();

    if let Some(timeout) = args.worker_timeout {
        config.dispatcher.worker_timeout_ms = timeout * 1000;
    }
    if let Some(work_dir) = args.work_dir {
        config.dispatcher.work_dir = Some(work_dir);
    }

    let dispatcher = Arc::new(Dispatcher::open(config).await?);
    let config = dispatcher.config();

    tracing::info!("Starting data service dispatcher");
    tracing::info!("  Deployment mode: {}", config.dispatcher.deployment_mode);
    tracing::info!("  Worker timeout: {}ms", config.dispatcher.worker_timeout_ms);
    tracing::info!("  Heartbeat interval: {}ms", config.dispatcher.heartbeat_interval_ms);
    tracing::info!("  Storage root: {}", config.storage.base_path.display());
    match &config.dispatcher.work_dir {
        Some(dir) => tracing::info!("  Work directory: {}", dir.display()),
        None => tracing::warn!("No work directory configured; snapshots will not be recovered"),
    }
    let heartbeat_interval = Duration::from_millis(config.dispatcher.heartbeat_interval_ms);

    let recovered = dispatcher.recover().await?;
    if recovered > 0 {
        tracing::info!("Recovered {} snapshots", recovered);
    }

    let service = DispatcherServiceImpl::new(dispatcher.clone());

    // Build address
    let addr: SocketAddr = format!("{}:{}", args.address, args.port).parse()?;

    tracing::info!("Listening on {}", addr);

    // Sweep for silent workers so their streams can be handed out again
    let bg_dispatcher = dispatcher.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        loop {
            interval.tick().await;
            bg_dispatcher.check_worker_timeouts().await;
        }
    });

    Server::builder()
        .add_service(DispatcherServiceServer::new(service))
        .serve_with_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down dispatcher...");
        })
        .await?;

    Ok(())
}
