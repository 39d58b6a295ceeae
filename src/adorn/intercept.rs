//! Generic I/O interception decorator.
//!
//! Hooks see the bytes actually moved by the inner stream: `on_read` gets what was
//! read, `on_write` what the inner stream accepted.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

type DataHook = Arc<dyn Fn(&[u8]) + Send + Sync>;
type EventHook = Arc<dyn Fn() + Send + Sync>;

/// Set of optional hooks.
#[derive(Clone, Default)]
pub struct IoHooks {
    on_read: Option<DataHook>,
    on_write: Option<DataHook>,
    on_shutdown: Option<EventHook>,
}

impl fmt::Debug for IoHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoHooks")
            .field("on_read", &self.on_read.is_some())
            .field("on_write", &self.on_write.is_some())
            .field("on_shutdown", &self.on_shutdown.is_some())
            .finish()
    }
}

impl IoHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_read(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.on_read = Some(Arc::new(f));
        self
    }

    pub fn on_write(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.on_write = Some(Arc::new(f));
        self
    }

    pub fn on_shutdown(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_shutdown = Some(Arc::new(f));
        self
    }
}

/// Stream invoking [`IoHooks`] around its inner stream.
#[derive(Debug)]
pub struct InterceptStream<S> {
    inner: S,
    hooks: IoHooks,
}

impl<S> InterceptStream<S> {
    pub fn new(inner: S, hooks: IoHooks) -> Self {
        Self { inner, hooks }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for InterceptStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let (Poll::Ready(Ok(())), Some(hook)) = (&res, &this.hooks.on_read) {
            let fresh = &buf.filled()[before..];
            if !fresh.is_empty() {
                hook(fresh);
            }
        }
        res
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for InterceptStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let (Poll::Ready(Ok(n)), Some(hook)) = (&res, &this.hooks.on_write) {
            if *n > 0 {
                hook(&buf[..*n]);
            }
        }
        res
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_shutdown(cx);
        if let (Poll::Ready(_), Some(hook)) = (&res, &this.hooks.on_shutdown) {
            hook();
        }
        res
    }
}
