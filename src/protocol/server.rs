//! Accept loop.
//!
//! # Responsibilities
//! - Accept raw connections until the listener fails
//! - Decorate and handle each connection on its own task
//! - Bound concurrency through a `TaskPool`
//!
//! # Design Decisions
//! - An accept error ends the loop quietly; it is how a closed listener shows up
//! - Without a handler, connections are shut down rather than leaked
//! - `BoundedPool` waits for a slot before taking the next connection (backpressure)

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

use crate::net::listener::Listener;
use crate::net::stream::BoxStream;
use crate::observability::metrics;

/// Handles one decorated connection.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve_conn(&self, conn: BoxStream, peer: SocketAddr);
}

/// Closes every connection immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopHandler;

#[async_trait]
impl Handler for NopHandler {
    async fn serve_conn(&self, mut conn: BoxStream, peer: SocketAddr) {
        tracing::debug!(peer = %peer, "No handler, closing connection");
        let _ = conn.shutdown().await;
    }
}

/// Runs connection tasks.
#[async_trait]
pub trait TaskPool: Send + Sync {
    async fn run(&self, task: BoxFuture<'static, ()>);
}

/// One task per connection, no limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundedPool;

#[async_trait]
impl TaskPool for UnboundedPool {
    async fn run(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

/// At most `max` tasks at once.
#[derive(Debug, Clone)]
pub struct BoundedPool {
    limit: Arc<Semaphore>,
    max: usize,
}

impl BoundedPool {
    pub fn new(max: usize) -> Self {
        Self {
            limit: Arc::new(Semaphore::new(max.max(1))),
            max: max.max(1),
        }
    }

    pub fn available(&self) -> usize {
        self.limit.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

#[async_trait]
impl TaskPool for BoundedPool {
    async fn run(&self, task: BoxFuture<'static, ()>) {
        let Ok(permit) = self.limit.clone().acquire_owned().await else {
            return;
        };
        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
    }
}

/// Accept loop over a [`Listener`].
pub struct Server {
    listener: Listener,
    handler: Arc<dyn Handler>,
    pool: Arc<dyn TaskPool>,
}

impl Server {
    pub fn new(listener: Listener) -> Self {
        Self {
            listener,
            handler: Arc::new(NopHandler),
            pool: Arc::new(UnboundedPool),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_pool(mut self, pool: Arc<dyn TaskPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until the listener errors.
    pub async fn serve(mut self) {
        loop {
            let (conn, peer) = match self.listener.accept_raw().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::debug!(error = %e, "Accept loop exiting");
                    return;
                }
            };
            metrics::record_accepted();

            let chain = self.listener.chain().clone();
            let handler = self.handler.clone();
            let task = async move {
                match chain.apply(conn).await {
                    Ok(conn) => handler.serve_conn(conn, peer).await,
                    Err(e) => tracing::debug!(
                        peer = %peer,
                        error = %e,
                        "Decorating accepted connection failed"
                    ),
                }
            };
            self.pool.run(task.boxed()).await;
        }
    }

    /// Serve until `shutdown` resolves; the listener is closed on return.
    pub async fn serve_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = self.serve() => {}
            _ = shutdown => tracing::info!("Server stopped accepting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adorn::AdornChain;
    use crate::net::transport::TcpTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn missing_handler_closes_connections() {
        let listener = Listener::bind(&TcpTransport, "127.0.0.1:0", AdornChain::new())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(Server::new(listener).serve());

        let mut conn = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), conn.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn bounded_pool_limits_concurrency() {
        let pool = BoundedPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (release, _) = tokio::sync::broadcast::channel::<()>(1);

        for _ in 0..2 {
            let running = running.clone();
            let peak = peak.clone();
            let mut rx = release.subscribe();
            pool.run(
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let _ = rx.recv().await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
                .boxed(),
            )
            .await;
        }

        // A third task waits for a slot.
        let third = pool.run(async {}.boxed());
        assert!(tokio::time::timeout(Duration::from_millis(50), third).await.is_err());
        assert_eq!(pool.available(), 0);

        release.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), pool.run(async {}.boxed()))
            .await
            .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn zero_bound_is_one() {
        assert_eq!(BoundedPool::new(0).max(), 1);
    }
}
