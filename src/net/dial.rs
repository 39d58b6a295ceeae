//! Client-side dialing.
//!
//! # Responsibilities
//! - Cancellable dial over any `ConnFactory`
//! - `Client`: timeout, optional forward proxy, and before/main/after decoration
//!
//! # Design Decisions
//! - A dial that loses the race to cancellation finishes in the background and its
//!   stream is shut down; the caller never sees it
//! - The TCP path applies `before`, then the main chain, then `before` again.
//!   `after` is applied by transports that finish with their own framing (kcp)

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

use crate::adorn::{compose, AdornChain};
use crate::error::{Error, Result};
use crate::net::stream::BoxStream;
use crate::net::transport::{ConnFactory, TcpTransport};

/// Dial `address` on a background task, giving up when `cancel` resolves first.
///
/// # Errors
///
/// `Error::Cancelled` when `cancel` wins, otherwise the factory's error.
pub async fn dial_with_cancel<C>(
    factory: Arc<dyn ConnFactory>,
    address: String,
    timeout: Duration,
    cancel: C,
) -> Result<BoxStream>
where
    C: Future<Output = ()>,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let res = factory.connect(&address, timeout).await;
        if let Err(Ok(mut late)) = tx.send(res) {
            tracing::debug!(address = %address, "dial finished after cancellation, closing");
            let _ = late.shutdown().await;
        }
    });

    tokio::select! {
        res = rx => match res {
            Ok(res) => res.map_err(Error::from),
            Err(_) => Err(Error::Cancelled),
        },
        _ = cancel => Err(Error::Cancelled),
    }
}

/// A decorating dialer.
#[derive(Clone)]
pub struct Client {
    timeout: Duration,
    transport: Arc<dyn ConnFactory>,
    forward: Option<Arc<dyn ConnFactory>>,
    before: AdornChain,
    chain: AdornChain,
    after: AdornChain,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("timeout", &self.timeout)
            .field("forward", &self.forward.is_some())
            .field("before", &self.before.names())
            .field("chain", &self.chain.names())
            .field("after", &self.after.names())
            .finish()
    }
}

impl Client {
    /// Direct TCP client with no decoration.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            transport: Arc::new(TcpTransport),
            forward: None,
            before: AdornChain::new(),
            chain: AdornChain::new(),
            after: AdornChain::new(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn ConnFactory>) -> Self {
        self.transport = transport;
        self
    }

    /// Tunnel through `forward` instead of dialing directly.
    pub fn with_forward(mut self, forward: Arc<dyn ConnFactory>) -> Self {
        self.forward = Some(forward);
        self
    }

    pub fn with_before(mut self, before: AdornChain) -> Self {
        self.before = before;
        self
    }

    pub fn with_chain(mut self, chain: AdornChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_after(mut self, after: AdornChain) -> Self {
        self.after = after;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn chain(&self) -> &AdornChain {
        &self.chain
    }

    fn factory(&self) -> Arc<dyn ConnFactory> {
        self.forward.clone().unwrap_or_else(|| self.transport.clone())
    }

    async fn decorate(&self, conn: BoxStream) -> Result<BoxStream> {
        Ok(compose(conn, &[&self.before, &self.chain, &self.before]).await?)
    }

    pub async fn dial(&self, address: &str) -> Result<BoxStream> {
        let conn = self.factory().connect(address, self.timeout).await?;
        self.decorate(conn).await
    }

    /// Like [`dial`](Self::dial) but abandoned when `cancel` resolves first.
    pub async fn dial_with_cancel<C>(&self, address: &str, cancel: C) -> Result<BoxStream>
    where
        C: Future<Output = ()>,
    {
        let conn =
            dial_with_cancel(self.factory(), address.to_string(), self.timeout, cancel).await?;
        self.decorate(conn).await
    }

    /// Dial over a transport that carries its own session (kcp): main chain, then `after`.
    pub async fn dial_session(&self, address: &str) -> Result<BoxStream> {
        let conn = self.transport.connect(address, self.timeout).await?;
        Ok(compose(conn, &[&self.chain, &self.after]).await?)
    }

    pub async fn dial_session_with_cancel<C>(&self, address: &str, cancel: C) -> Result<BoxStream>
    where
        C: Future<Output = ()>,
    {
        let conn = dial_with_cancel(
            self.transport.clone(),
            address.to_string(),
            self.timeout,
            cancel,
        )
        .await?;
        Ok(compose(conn, &[&self.chain, &self.after]).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::stream::boxed;
    use crate::net::transport::factory_fn;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn cancel_wins_over_slow_dial() {
        let closed = Arc::new(AtomicBool::new(false));
        let seen = closed.clone();
        let factory: Arc<dyn ConnFactory> = Arc::new(factory_fn(move |_addr, _t| {
            let seen = seen.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                let (a, b) = tokio::io::duplex(8);
                tokio::spawn(async move {
                    let mut b = b;
                    let mut buf = [0u8; 1];
                    let n = tokio::io::AsyncReadExt::read(&mut b, &mut buf).await.unwrap_or(0);
                    if n == 0 {
                        seen.store(true, Ordering::SeqCst);
                    }
                });
                Ok::<_, io::Error>(boxed(a))
            }
        }));

        let started = tokio::time::Instant::now();
        let err = dial_with_cancel(
            factory,
            "slow:1".into(),
            Duration::ZERO,
            tokio::time::sleep(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));

        // The late stream is closed once the dial completes.
        tokio::time::sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn factory_error_propagates() {
        let factory: Arc<dyn ConnFactory> = Arc::new(factory_fn(|_addr, _t| async {
            Err::<BoxStream, _>(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }));
        let err = dial_with_cancel(factory, "x:1".into(), Duration::ZERO, std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::ConnectionRefused));
    }
}
