//! Type-erased byte streams.
//!
//! Every transport and every decorator hands out a [`BoxStream`], so chains can be
//! composed without knowing the concrete layers underneath.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional async byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

impl fmt::Debug for dyn AsyncStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncStream")
    }
}

/// Owned, type-erased stream connection.
pub type BoxStream = Box<dyn AsyncStream>;

/// Erase a concrete stream.
pub fn boxed<S>(stream: S) -> BoxStream
where
    S: AsyncStream + 'static,
{
    Box::new(stream)
}
