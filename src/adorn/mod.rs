//! Connection decoration pipeline.
//!
//! # Data Flow
//! ```text
//! raw stream
//!     → chain[0] wraps it
//!     → chain[1] wraps the result
//!     → ...
//!     → chain[n-1] is outermost: application reads/writes hit it first
//! ```
//!
//! On a write the outermost decorator transforms the bytes first and the innermost last,
//! right before the wire. Decorators that must see wire bytes (byte counters) belong at
//! the head of the chain, or in the `before` chain of a `Client`.
//!
//! # Decorators
//! - `compress.rs`: per-frame deflate
//! - `cipher.rs`: AES-GCM ("stcp")
//! - `flow.rs`: shared read/write/total byte counters
//! - `intercept.rs`: read/write/shutdown hooks
//! - TLS client and server handshakes (tokio-rustls)
//!
//! # Design Decisions
//! - An empty chain is the identity
//! - Construction failures (unknown cipher) surface when the chain is built, not per connection

pub mod cipher;
pub mod compress;
pub mod flow;
pub mod framed;
pub mod intercept;

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::Result;
use crate::net::stream::{boxed, BoxStream};

use self::cipher::Cipher;
use self::flow::{Flow, FlowStream};
use self::intercept::{InterceptStream, IoHooks};

type AdornFn = dyn Fn(BoxStream) -> BoxFuture<'static, io::Result<BoxStream>> + Send + Sync;

/// One connection decorator.
#[derive(Clone)]
pub struct Adorn {
    name: &'static str,
    f: Arc<AdornFn>,
}

impl fmt::Debug for Adorn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Adorn").field(&self.name).finish()
    }
}

impl Adorn {
    /// A decorator that wraps synchronously.
    pub fn new<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(BoxStream) -> BoxStream + Send + Sync + 'static,
    {
        Self {
            name,
            f: Arc::new(move |conn| {
                let wrapped = f(conn);
                async move { Ok::<_, io::Error>(wrapped) }.boxed()
            }),
        }
    }

    /// A decorator that needs I/O to wrap, such as a handshake.
    pub fn with_handshake<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: Fn(BoxStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<BoxStream>> + Send + 'static,
    {
        Self {
            name,
            f: Arc::new(move |conn| f(conn).boxed()),
        }
    }

    pub fn identity() -> Self {
        Self::new("identity", |conn| conn)
    }

    /// Deflate when `enabled`, identity otherwise.
    pub fn compress(enabled: bool) -> Self {
        if enabled {
            Self::new("compress", |conn| boxed(compress::compress(conn)))
        } else {
            Self::identity()
        }
    }

    /// Cipher decorator from a method name and password.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the method is unknown or the password empty.
    pub fn cipher(method: &str, password: &str) -> Result<Self> {
        Ok(Self::cipher_with(Cipher::new(method, password)?))
    }

    pub fn cipher_with(key: Cipher) -> Self {
        Self::new("cipher", move |conn| boxed(cipher::encrypt(conn, key.clone())))
    }

    /// TLS client handshake toward `server_name`.
    pub fn tls_client(config: Arc<rustls::ClientConfig>, server_name: ServerName<'static>) -> Self {
        let connector = TlsConnector::from(config);
        Self::with_handshake("tls-client", move |conn| {
            let connector = connector.clone();
            let server_name = server_name.clone();
            async move {
                let tls = connector.connect(server_name, conn).await?;
                Ok::<_, io::Error>(boxed(tls))
            }
        })
    }

    /// TLS server handshake.
    pub fn tls_server(config: Arc<rustls::ServerConfig>) -> Self {
        let acceptor = TlsAcceptor::from(config);
        Self::with_handshake("tls-server", move |conn| {
            let acceptor = acceptor.clone();
            async move {
                let tls = acceptor.accept(conn).await?;
                Ok::<_, io::Error>(boxed(tls))
            }
        })
    }

    /// Byte accounting into `flow`.
    pub fn flow(flow: Flow) -> Self {
        Self::new("flow", move |conn| boxed(FlowStream::new(conn, flow.clone())))
    }

    /// I/O interception through `hooks`.
    pub fn intercept(hooks: IoHooks) -> Self {
        Self::new("intercept", move |conn| boxed(InterceptStream::new(conn, hooks.clone())))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn apply(&self, conn: BoxStream) -> io::Result<BoxStream> {
        (self.f)(conn).await
    }
}

/// Ordered decorator list; the last entry ends up outermost.
#[derive(Debug, Clone, Default)]
pub struct AdornChain(Vec<Adorn>);

impl AdornChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, adorn: Adorn) {
        self.0.push(adorn);
    }

    /// Chain with `adorn` placed first (innermost).
    pub fn prepended(&self, adorn: Adorn) -> Self {
        let mut chain = Vec::with_capacity(self.0.len() + 1);
        chain.push(adorn);
        chain.extend(self.0.iter().cloned());
        Self(chain)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Adorn> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(Adorn::name).collect()
    }

    /// Wrap `conn` with every decorator in order.
    pub async fn apply(&self, mut conn: BoxStream) -> io::Result<BoxStream> {
        for adorn in &self.0 {
            conn = adorn.apply(conn).await?;
        }
        Ok(conn)
    }
}

impl From<Vec<Adorn>> for AdornChain {
    fn from(chain: Vec<Adorn>) -> Self {
        Self(chain)
    }
}

impl FromIterator<Adorn> for AdornChain {
    fn from_iter<I: IntoIterator<Item = Adorn>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Adorn> for AdornChain {
    fn extend<I: IntoIterator<Item = Adorn>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

/// Apply several chains one after another.
pub async fn compose(mut conn: BoxStream, chains: &[&AdornChain]) -> io::Result<BoxStream> {
    for chain in chains {
        conn = chain.apply(conn).await?;
    }
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

    /// Uppercases everything written through it.
    struct Upper(BoxStream);

    impl AsyncRead for Upper {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for Upper {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let upper = buf.to_ascii_uppercase();
            Pin::new(&mut self.0).poll_write(cx, &upper)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_shutdown(cx)
        }
    }

    fn upper() -> Adorn {
        Adorn::new("upper", |conn| boxed(Upper(conn)))
    }

    fn tap(seen: Arc<Mutex<Vec<u8>>>) -> Adorn {
        Adorn::intercept(
            IoHooks::new().on_write(move |b| seen.lock().unwrap().extend_from_slice(b)),
        )
    }

    async fn write_through(chain: &AdornChain, data: &[u8]) -> Vec<u8> {
        let (a, mut b) = tokio::io::duplex(256);
        let mut conn = chain.apply(boxed(a)).await.unwrap();
        conn.write_all(data).await.unwrap();
        conn.shutdown().await.unwrap();
        let mut out = Vec::new();
        b.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn last_applied_is_outermost() {
        // [tap, upper]: upper is outermost, tap sits under it and sees transformed bytes.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = AdornChain::from(vec![tap(seen.clone()), upper()]);
        assert_eq!(write_through(&chain, b"abc").await, b"ABC");
        assert_eq!(&*seen.lock().unwrap(), b"ABC");

        // [upper, tap]: tap is outermost and sees the application bytes first.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = AdornChain::from(vec![upper(), tap(seen.clone())]);
        assert_eq!(write_through(&chain, b"abc").await, b"ABC");
        assert_eq!(&*seen.lock().unwrap(), b"abc");
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let chain = AdornChain::new();
        assert!(chain.is_empty());
        assert_eq!(write_through(&chain, b"raw bytes").await, b"raw bytes");
    }

    #[tokio::test]
    async fn disabled_compression_is_identity() {
        let chain = AdornChain::from(vec![Adorn::compress(false)]);
        assert_eq!(chain.names(), vec!["identity"]);
        assert_eq!(write_through(&chain, b"plain").await, b"plain");
    }

    #[test]
    fn unknown_cipher_fails_at_construction() {
        let err = Adorn::cipher("des-cbc", "secret").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn prepended_goes_first() {
        let chain = AdornChain::from(vec![Adorn::compress(true)]);
        let chain = chain.prepended(Adorn::flow(Flow::new()));
        assert_eq!(chain.names(), vec!["flow", "compress"]);
    }

    #[tokio::test]
    async fn cipher_and_compress_stack_symmetrically() {
        let build = || -> AdornChain {
            vec![Adorn::cipher("aes-256-gcm", "pw").unwrap(), Adorn::compress(true)].into()
        };
        let (a, b) = tokio::io::duplex(4096);
        let mut left = build().apply(boxed(a)).await.unwrap();
        let mut right = build().apply(boxed(b)).await.unwrap();

        left.write_all(&[7u8; 10_000]).await.unwrap();
        left.flush().await.unwrap();
        let mut got = vec![0u8; 10_000];
        right.read_exact(&mut got).await.unwrap();
        assert!(got.iter().all(|b| *b == 7));
    }
}
