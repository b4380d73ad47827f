//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the ordered, startup-fixed list of backends
//! - Apply the configured selection algorithm
//! - Hand out snapshots of the backend list for health checking

use std::sync::{Arc, PoisonError, RwLock};

use url::Url;

use crate::config::{parse_backend_address, BackendList, ConfigError, SelectionMode};
use crate::http::forward::{HttpClient, HttpForwarder};
use crate::load_balancer::{
    backend::Backend, least_conn::LeastConnections, round_robin::RoundRobin, LoadBalancer,
    NoBackendAvailable,
};

/// Ordered set of backends plus both selection policies.
///
/// The list is append-only and meant to be closed before traffic starts;
/// per-backend state carries its own synchronization.
#[derive(Debug, Default)]
pub struct Pool {
    backends: RwLock<Vec<Arc<Backend>>>,
    round_robin: RoundRobin,
    least_conn: LeastConnections,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool of HTTP backends from configured addresses.
    pub fn from_addresses(addresses: &BackendList, client: &HttpClient) -> Result<Self, ConfigError> {
        let pool = Self::new();
        for address in addresses.iter() {
            let url = parse_backend_address(address)?;
            pool.add_http_backend(url, client.clone())?;
        }
        Ok(pool)
    }

    fn add_http_backend(&self, url: Url, client: HttpClient) -> Result<(), ConfigError> {
        let forwarder = HttpForwarder::new(url.clone(), client).map_err(|e| {
            crate::config::ValidationError::InvalidBackend {
                address: url.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.add_backend(Arc::new(Backend::new(url, Arc::new(forwarder))));
        Ok(())
    }

    /// Append a backend. Only meant for use before traffic begins.
    pub fn add_backend(&self, backend: Arc<Backend>) {
        tracing::info!(backend = %backend.url(), "Backend registered");
        self.backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(backend);
    }

    /// Select an alive backend according to `mode`.
    pub fn select(&self, mode: SelectionMode) -> Result<Arc<Backend>, NoBackendAvailable> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        let selected = match mode {
            SelectionMode::RoundRobin => self.round_robin.next_server(&backends),
            SelectionMode::LeastConnections => self.least_conn.next_server(&backends),
        };

        selected.ok_or_else(|| {
            tracing::debug!(backend_count = backends.len(), mode = %mode, "No alive backends found");
            NoBackendAvailable
        })
    }

    /// Return a list of all backends (for health checking).
    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.backends.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of backends currently marked alive.
    pub fn alive_count(&self) -> usize {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|b| b.is_alive())
            .count()
    }
}
