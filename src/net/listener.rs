//! Decorating listener.
//!
//! # Responsibilities
//! - Bind through a `Transport`
//! - Hand out raw accepted streams, or streams wrapped by the listener's chain
//!
//! # Design Decisions
//! - Servers accept raw and decorate on the connection's own task so one slow
//!   handshake never stalls the accept loop

use std::net::SocketAddr;

use crate::adorn::AdornChain;
use crate::error::Result;
use crate::net::stream::BoxStream;
use crate::net::transport::{Acceptor, Transport};

/// A bound listener with a decoration chain.
pub struct Listener {
    inner: Box<dyn Acceptor>,
    chain: AdornChain,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.inner.local_addr().ok())
            .field("chain", &self.chain.names())
            .finish()
    }
}

impl Listener {
    pub async fn bind(transport: &dyn Transport, address: &str, chain: AdornChain) -> Result<Self> {
        let inner = transport.bind(address).await?;
        tracing::info!(
            address = %inner.local_addr()?,
            adorns = ?chain.names(),
            "Listener bound"
        );
        Ok(Self { inner, chain })
    }

    pub fn from_acceptor(inner: Box<dyn Acceptor>, chain: AdornChain) -> Self {
        Self { inner, chain }
    }

    /// Accept without decorating.
    pub async fn accept_raw(&mut self) -> Result<(BoxStream, SocketAddr)> {
        Ok(self.inner.accept().await?)
    }

    /// Accept and decorate.
    pub async fn accept(&mut self) -> Result<(BoxStream, SocketAddr)> {
        let (conn, peer) = self.accept_raw().await?;
        Ok((self.chain.apply(conn).await?, peer))
    }

    pub fn chain(&self) -> &AdornChain {
        &self.chain
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}
