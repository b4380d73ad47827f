//! HTTP load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌───────────────────────────────────────────────┐
//!                        │                 LOAD BALANCER                  │
//!   Client Request       │  ┌────────┐   ┌────────────┐   ┌───────────┐  │
//!   ─────────────────────┼─▶│  http  │──▶│ dispatcher │──▶│   pool    │  │
//!                        │  │ server │   │ (retries)  │   │ rr / least│  │
//!                        │  └────────┘   └─────┬──────┘   └─────┬─────┘  │
//!                        │                     │                │        │
//!   Client Response      │                     ▼                ▼        │
//!   ◀────────────────────┼──────────────  forward.rs ◀──── backend ──────┼──▶ Upstream
//!                        │                                      ▲        │
//!                        │  ┌────────────────────┐              │        │
//!                        │  │  health monitor    │── set_alive ─┘        │
//!                        │  │ (periodic probes)  │                       │
//!                        │  └────────────────────┘                       │
//!                        └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use loadbalancer::config::{
    read_config, validate_config, BackendList, BalancerConfig, ConfigError, SelectionMode,
};
use loadbalancer::http::HttpServer;
use loadbalancer::lifecycle::{signals, Shutdown};
use loadbalancer::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "loadbalancer")]
#[command(version, about = "HTTP load balancer with health checks and retries", long_about = None)]
struct Cli {
    /// Config file path (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on (binds 0.0.0.0)
    #[arg(long)]
    port: Option<u16>,

    /// Full bind address, e.g. 127.0.0.1:8000
    #[arg(long, conflicts_with = "port")]
    bind: Option<String>,

    /// Comma-separated backend URLs
    #[arg(long)]
    backends: Option<String>,

    /// Load balancing mode
    #[arg(long, value_enum)]
    mode: Option<SelectionMode>,

    /// Maximum attempts per request
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Per-attempt timeout in milliseconds (0 disables)
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Health check interval in milliseconds
    #[arg(long)]
    health_interval_ms: Option<u64>,

    /// Health probe timeout in milliseconds
    #[arg(long)]
    health_timeout_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Expose Prometheus metrics on this address
    #[arg(long)]
    metrics_address: Option<String>,
}

impl Cli {
    /// Defaults, then the config file, then flags.
    fn into_config(self) -> Result<BalancerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => BalancerConfig::default(),
        };

        if let Some(port) = self.port {
            config.listener.bind_address = format!("0.0.0.0:{port}");
        }
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }
        if let Some(backends) = self.backends {
            config.backends = BackendList::from_csv(&backends);
        }
        if let Some(mode) = self.mode {
            config.dispatch.mode = mode;
        }
        if let Some(n) = self.max_attempts {
            config.dispatch.max_attempts = n;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.dispatch.request_timeout_ms = ms;
        }
        if let Some(ms) = self.health_interval_ms {
            config.health_check.interval_ms = ms;
        }
        if let Some(ms) = self.health_timeout_ms {
            config.health_check.timeout_ms = ms;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(addr) = self.metrics_address {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = addr;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    logging::init(&config.observability.log_level);
    tracing::info!("loadbalancer v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        mode = %config.dispatch.mode,
        max_attempts = config.dispatch.max_attempts,
        request_timeout_ms = config.dispatch.request_timeout_ms,
        health_interval_ms = config.health_check.interval_ms,
        health_timeout_ms = config.health_check.timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let server = HttpServer::new(config.clone())?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    signals::spawn_signal_listener(shutdown);

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
