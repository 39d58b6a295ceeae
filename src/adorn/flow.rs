//! Traffic accounting decorator.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Shared byte counters. Clones observe the same totals.
#[derive(Debug, Clone, Default)]
pub struct Flow {
    read: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_bytes(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn written_bytes(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn add_read(&self, n: usize) {
        self.read.fetch_add(n as u64, Ordering::Relaxed);
        self.total.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn add_written(&self, n: usize) {
        self.written.fetch_add(n as u64, Ordering::Relaxed);
        self.total.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Stream counting every byte passing through it.
#[derive(Debug)]
pub struct FlowStream<S> {
    inner: S,
    flow: Flow,
}

impl<S> FlowStream<S> {
    pub fn new(inner: S, flow: Flow) -> Self {
        Self { inner, flow }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for FlowStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let res = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = res {
            this.flow.add_read(buf.filled().len() - before);
        }
        res
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for FlowStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = res {
            this.flow.add_written(n);
        }
        res
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn counters_are_shared_between_streams() {
        let flow = Flow::new();
        let (a, mut b) = tokio::io::duplex(64);
        let (c, mut d) = tokio::io::duplex(64);
        let mut a = FlowStream::new(a, flow.clone());
        let mut c = FlowStream::new(c, flow.clone());

        a.write_all(b"12345").await.unwrap();
        c.write_all(b"678").await.unwrap();
        b.write_all(b"ab").await.unwrap();

        let mut buf = [0u8; 2];
        a.read_exact(&mut buf).await.unwrap();
        let mut sink = [0u8; 8];
        let _ = d.read(&mut sink).await.unwrap();

        assert_eq!(flow.written_bytes(), 8);
        assert_eq!(flow.read_bytes(), 2);
        assert_eq!(flow.total_bytes(), 10);
    }
}
