//! Length-prefixed frame stream shared by the compression and cipher decorators.
//!
//! Wire layout per frame: `u32` big-endian body length, then the encoded body.
//! A single write never encodes more than [`MAX_CHUNK`] plaintext bytes.

use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const HEADER_LEN: usize = 4;

/// Largest plaintext carried by one frame.
pub const MAX_CHUNK: usize = 16 * 1024;

/// Largest encoded body accepted from the wire.
pub const MAX_FRAME: usize = 64 * 1024;

/// Turns plaintext chunks into frame bodies and back.
pub trait FrameCodec: Send + Unpin + 'static {
    fn encode(&mut self, plain: &[u8]) -> io::Result<Vec<u8>>;

    fn decode(&mut self, body: &[u8]) -> io::Result<Vec<u8>>;
}

/// Stream adapter applying a [`FrameCodec`] to everything written and read.
#[derive(Debug)]
pub struct FramedStream<S, C> {
    inner: S,
    codec: C,
    rd_raw: Vec<u8>,
    rd_plain: Vec<u8>,
    rd_pos: usize,
    wr_buf: Vec<u8>,
    wr_pos: usize,
}

impl<S, C> FramedStream<S, C> {
    pub fn new(inner: S, codec: C) -> Self {
        Self {
            inner,
            codec,
            rd_raw: Vec::new(),
            rd_plain: Vec::new(),
            rd_pos: 0,
            wr_buf: Vec::new(),
            wr_pos: 0,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Bytes needed before the buffered raw frame is complete.
    fn wanted(&self) -> io::Result<usize> {
        if self.rd_raw.len() < HEADER_LEN {
            return Ok(HEADER_LEN);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.rd_raw[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds {MAX_FRAME}"),
            ));
        }
        Ok(HEADER_LEN + len)
    }
}

impl<S, C> FramedStream<S, C>
where
    S: AsyncWrite + Unpin,
{
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.wr_pos < self.wr_buf.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.wr_buf[self.wr_pos..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.wr_pos += n;
        }
        self.wr_buf.clear();
        self.wr_pos = 0;
        Poll::Ready(Ok(()))
    }
}

impl<S, C> AsyncRead for FramedStream<S, C>
where
    S: AsyncRead + Unpin,
    C: FrameCodec,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.rd_pos < this.rd_plain.len() {
                let n = cmp::min(buf.remaining(), this.rd_plain.len() - this.rd_pos);
                buf.put_slice(&this.rd_plain[this.rd_pos..this.rd_pos + n]);
                this.rd_pos += n;
                return Poll::Ready(Ok(()));
            }

            let want = this.wanted()?;
            let start = this.rd_raw.len();
            if start < want {
                this.rd_raw.resize(want, 0);
                let mut rb = ReadBuf::new(&mut this.rd_raw[start..want]);
                let res = Pin::new(&mut this.inner).poll_read(cx, &mut rb);
                let n = rb.filled().len();
                this.rd_raw.truncate(start + n);
                match res {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Ready(Ok(())) if n == 0 => {
                        if start == 0 {
                            return Poll::Ready(Ok(()));
                        }
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "stream closed inside a frame",
                        )));
                    }
                    Poll::Ready(Ok(())) => continue,
                }
            }

            this.rd_plain = this.codec.decode(&this.rd_raw[HEADER_LEN..want])?;
            this.rd_pos = 0;
            this.rd_raw.clear();
        }
    }
}

impl<S, C> AsyncWrite for FramedStream<S, C>
where
    S: AsyncWrite + Unpin,
    C: FrameCodec,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let n = cmp::min(buf.len(), MAX_CHUNK);
        let body = this.codec.encode(&buf[..n])?;
        if body.len() > MAX_FRAME {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "encoded frame too large",
            )));
        }
        this.wr_buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        this.wr_buf.extend_from_slice(&body);

        // The chunk is accepted; whatever is left is pushed out by the next write or flush.
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Reverses every chunk; enough to prove frames are decoded one by one.
    struct Reverse;

    impl FrameCodec for Reverse {
        fn encode(&mut self, plain: &[u8]) -> io::Result<Vec<u8>> {
            Ok(plain.iter().rev().copied().collect())
        }

        fn decode(&mut self, body: &[u8]) -> io::Result<Vec<u8>> {
            Ok(body.iter().rev().copied().collect())
        }
    }

    #[tokio::test]
    async fn large_payload_spans_frames() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = FramedStream::new(a, Reverse);
        let mut reader = FramedStream::new(b, Reverse);

        let payload: Vec<u8> = (0..(MAX_CHUNK * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let send = tokio::spawn(async move {
            writer.write_all(&payload).await.unwrap();
            writer.shutdown().await.unwrap();
        });

        let mut got = Vec::new();
        reader.read_to_end(&mut got).await.unwrap();
        send.await.unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(&((MAX_FRAME as u32) + 1).to_be_bytes()).await.unwrap();

        let mut reader = FramedStream::new(b, Reverse);
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_frame_is_unexpected_eof() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(&8u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        let mut reader = FramedStream::new(b, Reverse);
        let mut buf = Vec::new();
        let err = reader.read_to_end(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
