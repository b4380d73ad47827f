//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server
//! - Track active connections (for Least Connections LB)
//! - Track liveness (set by health checks and failed requests)
//! - Own the forwarding capability for the upstream

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use url::Url;

use crate::http::forward::{authority_of, Forward};

/// A single backend server.
///
/// Liveness and the connection counter are independent atomics; the URL
/// never changes after construction.
pub struct Backend {
    /// Base URL the backend was registered with.
    url: Url,
    /// `host:port` used for probes and logging.
    authority: String,
    alive: AtomicBool,
    active_connections: AtomicUsize,
    forwarder: Arc<dyn Forward>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("url", &self.url.as_str())
            .field("alive", &self.is_alive())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

impl Backend {
    /// Create a new backend. Backends start out alive.
    pub fn new(url: Url, forwarder: Arc<dyn Forward>) -> Self {
        let authority = authority_of(&url);
        Self {
            url,
            authority,
            alive: AtomicBool::new(true),
            active_connections: AtomicUsize::new(0),
            forwarder,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `host:port` of the backend.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn forwarder(&self) -> &dyn Forward {
        self.forwarder.as_ref()
    }

    // --- Liveness ---

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Set liveness, returning the previous value.
    pub fn set_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::AcqRel)
    }

    // --- Connections ---

    /// Point-in-time snapshot; may be stale by the time it is used.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count, saturating at zero.
    pub fn dec_connections(&self) {
        let result = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if result.is_err() {
            tracing::warn!(backend = %self.authority, "Unpaired connection decrement ignored");
        }
    }

    /// Count a connection for as long as the returned guard lives.
    pub fn connection_guard(self: &Arc<Self>) -> BackendConnectionGuard {
        self.inc_connections();
        BackendConnectionGuard {
            backend: self.clone(),
        }
    }
}

/// A RAII guard that manages the active connection count.
///
/// Dropping it (when a relayed body ends, on error, timeout or cancellation
/// of the owning future) performs the paired decrement exactly once.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    backend: Arc<Backend>,
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendConnectionGuard {
    fn drop(&mut self) {
        self.backend.dec_connections();
    }
}
