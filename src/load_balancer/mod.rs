//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher asks for a backend (per configured mode)
//!     → pool.rs (read-locked, fixed backend list)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through backends)
//!         - least_conn.rs (pick backend with fewest connections)
//!     → backend.rs (connection guard counts the in-flight request)
//!     → Return backend or NoBackendAvailable
//! ```
//!
//! # Design Decisions
//! - Algorithms read per-backend atomics only; no pool-wide lock on the hot path
//! - Dead backends are excluded from selection
//! - Selections may act on slightly stale snapshots

use std::sync::Arc;

pub mod backend;
pub mod least_conn;
pub mod pool;
pub mod round_robin;

pub use backend::{Backend, BackendConnectionGuard};
pub use pool::Pool;

/// A backend selection algorithm.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick an alive backend, or `None` when every backend is dead.
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}

/// Every backend in the pool is currently marked dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no backend available")]
pub struct NoBackendAvailable;
