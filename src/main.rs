//! Gateway proxy (v1)
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::server ──┬─▶ routing::Router ──▶ ProxyPolicy
//!                    │                            │        (plain)          │
//!                    └── upgrade event ◀──────────┘                         ▼
//!                            (ws)                        load_balancer ──▶ ForwardingEngine
//!                                                                                   │
//!                                                                                   ▼
//!                                                                                Backend
//! ```

use std::path::PathBuf;

use clap::Parser;

use gateway_proxy::config::load_config;
use gateway_proxy::config::watcher::ConfigWatcher;
use gateway_proxy::lifecycle::{wait_for_shutdown, Shutdown};
use gateway_proxy::net::Listener;
use gateway_proxy::observability::{logging, metrics};
use gateway_proxy::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "gateway-proxy", version, about = "Load-balanced reverse-proxy gateway")]
struct Args {
    /// Configuration file (TOML, or JSON when the name ends in .json).
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Validate the configuration and build every policy, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "gateway-proxy starting"
    );

    let server = HttpServer::new(&config)?;
    tracing::info!(
        listeners = config.listeners.len(),
        service_endpoints = config.service_endpoints.len(),
        routes = server.route_count(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );
    if args.check {
        tracing::info!("Configuration OK");
        return Ok(());
    }

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let mut listeners = Vec::with_capacity(config.listeners.len());
    for listener_config in &config.listeners {
        listeners.push(Listener::bind(listener_config).await?);
    }

    let (watcher, config_updates) = ConfigWatcher::new(&args.config);
    // Kept alive for the lifetime of the server.
    let _watcher = match watcher.run() {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(()) => signal_shutdown.trigger(),
            Err(e) => tracing::error!(error = %e, "Signal handlers unavailable"),
        }
    });

    server.run(listeners, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
