//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{upstream::Upstream, LoadBalancer};

/// Least connections selector.
/// Selects the active upstream with the fewest tracked connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, upstreams: &[Arc<Upstream>]) -> Option<Arc<Upstream>> {
        // Ties go to the first one (stability).
        upstreams
            .iter()
            .filter(|u| u.active())
            .min_by_key(|u| u.conns_count())
            .cloned()
    }
}
