//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Least connections selector.
/// Selects the alive backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // Snapshot each count once; on a tie the earliest registered wins.
        backends
            .iter()
            .filter(|b| b.is_alive())
            .map(|b| (b.active_connections(), b))
            .min_by_key(|(count, _)| *count)
            .map(|(_, b)| b.clone())
    }
}
