//! Forwarding handler: one accepted connection, one upstream connection.

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::load_balancer::{LoadBalancer, UpstreamPool};
use crate::net::stream::BoxStream;
use crate::observability::metrics;
use crate::protocol::dialer::Dialer;
use crate::protocol::server::Handler;

/// Relays accepted connections to an active upstream.
#[derive(Debug, Clone)]
pub struct RelayHandler {
    pool: Arc<ArcSwap<UpstreamPool>>,
    balancer: Arc<dyn LoadBalancer>,
    dialer: Arc<Dialer>,
}

impl RelayHandler {
    /// `pool` may be swapped at any time; each connection uses the pool current at accept.
    pub fn new(
        pool: Arc<ArcSwap<UpstreamPool>>,
        balancer: Arc<dyn LoadBalancer>,
        dialer: Arc<Dialer>,
    ) -> Self {
        Self {
            pool,
            balancer,
            dialer,
        }
    }
}

#[async_trait]
impl Handler for RelayHandler {
    async fn serve_conn(&self, mut conn: BoxStream, peer: SocketAddr) {
        let pool = self.pool.load_full();
        let Some(upstream) = self.balancer.next_server(pool.backends()) else {
            tracing::warn!(peer = %peer, upstreams = pool.len(), "No active upstream");
            let _ = conn.shutdown().await;
            return;
        };

        let guard = upstream.track();
        let mut remote = match self.dialer.dial(guard.address()).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(
                    peer = %peer,
                    upstream = %guard.address(),
                    error = %e,
                    "Dial upstream failed"
                );
                let _ = conn.shutdown().await;
                return;
            }
        };

        tracing::debug!(peer = %peer, upstream = %guard.address(), "Relaying");
        match tokio::io::copy_bidirectional(&mut conn, &mut remote).await {
            Ok((to_upstream, to_client)) => {
                metrics::record_relay_bytes(to_client, to_upstream);
                tracing::debug!(
                    peer = %peer,
                    upstream = %guard.address(),
                    to_upstream,
                    to_client,
                    "Relay finished"
                );
            }
            Err(e) => {
                tracing::warn!(
                    peer = %peer,
                    upstream = %guard.address(),
                    error = %e,
                    "Relay failed"
                );
            }
        }
    }
}
