//! Deflate compression decorator.

use std::io::{self, Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::adorn::framed::{FrameCodec, FramedStream, MAX_CHUNK};

/// Per-frame deflate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deflate;

impl FrameCodec for Deflate {
    fn encode(&mut self, plain: &[u8]) -> io::Result<Vec<u8>> {
        let buf = Vec::with_capacity(plain.len() / 2 + 16);
        let mut enc = DeflateEncoder::new(buf, Compression::fast());
        enc.write_all(plain)?;
        enc.finish()
    }

    fn decode(&mut self, body: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(body.len() * 2);
        DeflateDecoder::new(body)
            .take(MAX_CHUNK as u64 + 1)
            .read_to_end(&mut out)?;
        if out.len() > MAX_CHUNK {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "decompressed frame too large",
            ));
        }
        Ok(out)
    }
}

/// A compressed stream.
pub type CompressStream<S> = FramedStream<S, Deflate>;

pub fn compress<S>(inner: S) -> CompressStream<S> {
    FramedStream::new(inner, Deflate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn repetitive_data_shrinks() {
        let plain = vec![b'a'; 4096];
        let body = Deflate.encode(&plain).unwrap();
        assert!(body.len() < plain.len() / 10);
        assert_eq!(Deflate.decode(&body).unwrap(), plain);
    }

    #[test]
    fn garbage_body_is_an_error() {
        assert!(Deflate.decode(&[0xff, 0xfe, 0xfd, 0xfc]).is_err());
    }

    #[tokio::test]
    async fn compressed_pair_exchanges_bytes() {
        let (a, b) = tokio::io::duplex(4096);
        let mut a = compress(a);
        let mut b = compress(b);

        a.write_all(b"hello over deflate").await.unwrap();
        a.flush().await.unwrap();

        let mut buf = [0u8; 18];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello over deflate");
    }
}
