//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → pool.rs (current upstreams)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through active upstreams)
//!         - least_conn.rs (pick active upstream with fewest connections)
//!     → upstream.rs (track the connection until it closes)
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless apart from their own cursor; upstreams track connections
//! - Inactive upstreams are excluded from selection
//! - A pool with no active upstream is reported, routing policy decides what to do

pub mod least_conn;
pub mod pool;
pub mod round_robin;
pub mod upstream;

use std::fmt;
use std::sync::Arc;

use crate::config::BalanceStrategy;

pub use least_conn::LeastConnections;
pub use pool::UpstreamPool;
pub use round_robin::RoundRobin;
pub use upstream::{ConnGuard, Upstream};

/// Upstream selection policy.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Pick an active upstream, or `None` when there is none.
    fn next_server(&self, upstreams: &[Arc<Upstream>]) -> Option<Arc<Upstream>>;
}

/// Strategy for the configured `balance.strategy`.
pub fn balancer(strategy: BalanceStrategy) -> Arc<dyn LoadBalancer> {
    match strategy {
        BalanceStrategy::RoundRobin => Arc::new(RoundRobin::new()),
        BalanceStrategy::LeastConn => Arc::new(LeastConnections::new()),
    }
}
