//! Demo upstream for exercising the load balancer.
//!
//! Answers every path with a greeting naming its port, optionally after an
//! artificial delay (`--sleep`, or `?sleep=MS` per request).

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    routing::any,
    Router,
};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "backend-server")]
#[command(about = "Test backend for the load balancer", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value = "8081")]
    port: u16,

    /// Milliseconds to sleep before responding
    #[arg(long, default_value = "0")]
    sleep: u64,
}

#[derive(Clone)]
struct Settings {
    port: u16,
    sleep_ms: u64,
}

#[derive(Deserialize)]
struct SleepQuery {
    sleep: Option<String>,
}

/// Per-request `?sleep=MS`; anything unparsable falls back to the default.
fn requested_delay(sleep: Option<&str>, default_ms: u64) -> u64 {
    sleep.and_then(|s| s.parse().ok()).unwrap_or(default_ms)
}

async fn greet(State(settings): State<Settings>, Query(query): Query<SleepQuery>) -> String {
    let delay = requested_delay(query.sleep.as_deref(), settings.sleep_ms);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    format!("Hello, I am the server on port {}\n", settings.port)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    loadbalancer::observability::logging::init("info");

    let settings = Settings {
        port: cli.port,
        sleep_ms: cli.sleep,
    };
    let app = Router::new()
        .route("/", any(greet))
        .route("/{*path}", any(greet))
        .with_state(settings);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, sleep_ms = cli.sleep, "Test backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(loadbalancer::lifecycle::signals::wait_for_signal())
        .await?;
    Ok(())
}
