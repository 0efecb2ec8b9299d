//! Filter gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                     FILTER GATEWAY                        │
//!                      │                                                           │
//!   Client Request     │  ┌─────────┐   ┌───────────────────────────────────────┐  │
//!   ───────────────────┼─▶│  http   │──▶│ runtime guard → transaction id →      │  │
//!                      │  │ server  │   │ session → throttle → cookies →        │  │
//!                      │  └─────────┘   │ password replay → basic auth →        │  │
//!                      │       ▲        │ transaction id (out)                  │  │
//!                      │       │        └──────────────────┬────────────────────┘  │
//!                      │       │                           ▼                       │
//!   Client Response    │       │        ┌──────────┐   ┌──────────────┐            │
//!   ◀──────────────────┼───────┴────────│ routing  │──▶│ client       │◀───────────┼──── Upstream
//!                      │                │ dispatch │   │ handler      │            │
//!                      │                └──────────┘   └──────────────┘            │
//!                      │                                                           │
//!                      │  config (TOML + watcher) · lifecycle · observability      │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use filter_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use filter_gateway::lifecycle::{spawn_signal_handler, Shutdown};
use filter_gateway::observability::{logging, metrics};
use filter_gateway::HttpServer;

const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "filter-gateway", version, about = "HTTP filter gateway")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "filter-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    // Without a watcher the sender is dropped and the reload loop ends at once.
    let (updates, _watcher) = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (rx, Some(watcher.run()?))
        }
        _ => (mpsc::unbounded_channel().1, None),
    };

    let shutdown = Arc::new(Shutdown::new());
    let server = HttpServer::new(config)?;
    let server_shutdown = shutdown.subscribe();
    spawn_signal_handler(shutdown.clone());

    let mut on_shutdown = shutdown.subscribe();
    let mut served = tokio::spawn(server.run(listener, updates, server_shutdown));
    tokio::select! {
        joined = &mut served => joined??,
        _ = on_shutdown.recv() => {
            match tokio::time::timeout(DRAIN_DEADLINE, &mut served).await {
                Ok(joined) => joined??,
                Err(_) => tracing::warn!(
                    deadline_secs = DRAIN_DEADLINE.as_secs(),
                    "Drain deadline passed, dropping remaining connections"
                ),
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
