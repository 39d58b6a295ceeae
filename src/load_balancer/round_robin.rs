//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{upstream::Upstream, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through upstreams, skipping inactive ones.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, upstreams: &[Arc<Upstream>]) -> Option<Arc<Upstream>> {
        if upstreams.is_empty() {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = upstreams.len();
        (0..len)
            .map(|i| &upstreams[(start + i) % len])
            .find(|u| u.active())
            .cloned()
    }
}
