//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe backends with a bounded TCP connect
//! - Update backend liveness based on results
//! - Expose a single-shot check and a start/stop task handle

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::lifecycle::Shutdown;
use crate::load_balancer::{Backend, Pool};
use crate::observability::metrics;

/// Why a probe considered a backend unreachable.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

pub struct HealthMonitor {
    pool: Arc<Pool>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(pool: Arc<Pool>, config: HealthCheckConfig) -> Self {
        Self { pool, config }
    }

    /// Spawn the periodic loop; the returned handle stops it.
    pub fn start(self) -> HealthTask {
        let shutdown = Shutdown::new();
        let receiver = shutdown.subscribe();
        let handle = tokio::spawn(self.run(receiver));
        HealthTask { shutdown, handle }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            "Health monitor starting"
        );

        // First tick fires immediately.
        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every backend once, concurrently, and apply the results.
    ///
    /// Returns the number of backends found alive.
    pub async fn check_all(&self) -> usize {
        let backends = self.pool.all_backends();
        let timeout = self.config.timeout();

        let results = join_all(backends.iter().map(|backend| async move {
            let result = probe(backend.authority(), timeout).await;
            apply(backend, result)
        }))
        .await;

        let alive = results.into_iter().filter(|alive| *alive).count();
        tracing::debug!(alive, total = backends.len(), "Health check round complete");
        alive
    }
}

/// TCP connect to `authority`, bounded by `timeout`.
pub async fn probe(authority: &str, timeout: Duration) -> Result<(), ProbeError> {
    match time::timeout(timeout, TcpStream::connect(authority)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(ProbeError::Connect(e)),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

fn apply(backend: &Backend, result: Result<(), ProbeError>) -> bool {
    let alive = result.is_ok();
    let was_alive = backend.set_alive(alive);

    match (&result, was_alive) {
        (Ok(()), false) => {
            tracing::info!(backend = %backend.authority(), "Backend recovered, back in rotation");
        }
        (Err(e), true) => {
            tracing::warn!(backend = %backend.authority(), error = %e, "Backend unreachable, removed from rotation");
        }
        (Err(e), false) => {
            tracing::debug!(backend = %backend.authority(), error = %e, "Backend still unreachable");
        }
        (Ok(()), true) => {}
    }

    metrics::record_backend_alive(backend.authority(), alive);
    alive
}

/// Handle to a running health monitor.
pub struct HealthTask {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

impl HealthTask {
    /// Signal the loop to exit and wait for it.
    pub async fn stop(self) {
        self.shutdown.trigger();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Health monitor task failed");
        }
    }
}
