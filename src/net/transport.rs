//! Transport capabilities.
//!
//! # Responsibilities
//! - `ConnFactory`: dial an address within a timeout
//! - `Transport`: a `ConnFactory` that can also bind listeners
//! - `TcpTransport`: the default, direct TCP
//!
//! # Design Decisions
//! - KCP and other transports are plugged in through `Transport`, not built in
//! - A zero timeout means "no limit"

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::net::stream::{boxed, BoxStream};

/// Pluggable low-level dial.
#[async_trait]
pub trait ConnFactory: Send + Sync {
    async fn connect(&self, address: &str, timeout: Duration) -> io::Result<BoxStream>;
}

impl fmt::Debug for dyn ConnFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnFactory")
    }
}

/// A dial capability that can also listen.
#[async_trait]
pub trait Transport: ConnFactory {
    async fn bind(&self, address: &str) -> io::Result<Box<dyn Acceptor>>;
}

/// The accepting half of a bound transport.
#[async_trait]
pub trait Acceptor: Send {
    async fn accept(&mut self) -> io::Result<(BoxStream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Run `fut` bounded by `timeout` unless the timeout is zero.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, what: &str, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    if timeout.is_zero() {
        return fut.await;
    }
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{what} timed out after {timeout:?}"),
        )),
    }
}

/// Direct TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl ConnFactory for TcpTransport {
    async fn connect(&self, address: &str, timeout: Duration) -> io::Result<BoxStream> {
        let stream = with_timeout(timeout, "tcp connect", TcpStream::connect(address)).await?;
        stream.set_nodelay(true)?;
        Ok(boxed(stream))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn bind(&self, address: &str) -> io::Result<Box<dyn Acceptor>> {
        let listener = TcpListener::bind(address).await?;
        Ok(Box::new(TcpAcceptor { inner: listener }))
    }
}

/// Accepting side of [`TcpTransport`].
#[derive(Debug)]
pub struct TcpAcceptor {
    inner: TcpListener,
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&mut self) -> io::Result<(BoxStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok((boxed(stream), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// A [`ConnFactory`] backed by a closure.
pub struct FnFactory<F>(F);

impl<F> fmt::Debug for FnFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnFactory")
    }
}

/// Build a [`ConnFactory`] from `Fn(address, timeout) -> Future<Output = io::Result<BoxStream>>`.
pub fn factory_fn<F, Fut>(f: F) -> FnFactory<F>
where
    F: Fn(String, Duration) -> Fut + Send + Sync,
    Fut: Future<Output = io::Result<BoxStream>> + Send,
{
    FnFactory(f)
}

#[async_trait]
impl<F, Fut> ConnFactory for FnFactory<F>
where
    F: Fn(String, Duration) -> Fut + Send + Sync,
    Fut: Future<Output = io::Result<BoxStream>> + Send,
{
    async fn connect(&self, address: &str, timeout: Duration) -> io::Result<BoxStream> {
        (self.0)(address.to_string(), timeout).await
    }
}
