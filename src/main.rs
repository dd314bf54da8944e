//! Load-balancing reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request        ┌──────────────────────────────────────────────┐
//!     ──────────────────────┼─▶ http::server ─▶ http::dispatch             │
//!                           │                     │  client IP → key       │
//!                           │                     ▼                        │
//!                           │              load_balancer::pool             │
//!                           │                     │  Balancer::balance     │
//!                           │                     ▼                        │
//!     Client Response       │               http::forward ────────────────┼──▶ Backend
//!     ◀─────────────────────┼──────────────────────────────────────────────┼─── Server
//!                           │                                              │
//!                           │  health::active  config::watcher  lifecycle  │
//!                           └──────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use balancer::config::{load_config, validate_config, watcher::ConfigWatcher, ProxyConfig};
use balancer::lifecycle::{signals, Shutdown};
use balancer::observability::{logging, metrics};
use balancer::{BalancerError, BalancerFactory, HttpServer};

#[derive(Parser)]
#[command(name = "balancer")]
#[command(about = "Load-balancing HTTP reverse proxy", long_about = None)]
struct Cli {
    /// TOML configuration file; reloaded on change.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the file.
    #[arg(long)]
    bind: Option<String>,

    /// Balancing algorithm, overrides the file.
    #[arg(short, long)]
    algorithm: Option<String>,

    /// Backend URL; repeat for several. Replaces the file's list.
    #[arg(short, long = "backend")]
    backends: Vec<String>,

    /// Print the registered algorithms and exit.
    #[arg(long)]
    list_algorithms: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let factory = BalancerFactory::with_builtin();

    if cli.list_algorithms {
        for name in factory.algorithms() {
            println!("{name}");
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(algorithm) = cli.algorithm {
        config.algorithm = algorithm;
    }
    if !cli.backends.is_empty() {
        config.backends = cli.backends;
    }
    if !factory.supports(&config.algorithm) {
        eprintln!(
            "unknown algorithm {:?}, expected one of: {}",
            config.algorithm,
            factory.algorithms().join(", ")
        );
        return Err(BalancerError::AlgorithmNotSupported(config.algorithm).into());
    }
    if let Err(errors) = validate_config(&config) {
        for e in &errors {
            eprintln!("invalid configuration: {e}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init(&config.observability);
    tracing::info!("balancer v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        algorithm = %config.algorithm,
        backends = config.backends.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(config.clone(), &factory).map_err(|e| {
        tracing::error!(error = %e, "Failed to build upstream pool");
        e
    })?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    // The watcher handle must outlive the server.
    let (_watcher, config_updates) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
