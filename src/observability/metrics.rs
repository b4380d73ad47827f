//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_requests_total` (counter): requests answered, by status
//! - `lb_request_duration_seconds` (histogram): end-to-end latency
//! - `lb_forward_failures_total` (counter): failed attempts, by backend and reason
//! - `lb_backend_alive` (gauge): 1=alive, 0=dead

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(status: u16, start: Instant) {
    counter!("lb_requests_total", "status" => status.to_string()).increment(1);
    histogram!("lb_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_forward_failure(backend: &str, reason: &'static str) {
    counter!(
        "lb_forward_failures_total",
        "backend" => backend.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_backend_alive(backend: &str, alive: bool) {
    gauge!("lb_backend_alive", "backend" => backend.to_string()).set(if alive { 1.0 } else { 0.0 });
}
