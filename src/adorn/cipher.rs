//! Symmetric cipher decorator ("stcp").
//!
//! Every frame body is `nonce (12 bytes) || AES-GCM ciphertext + tag`, the key being
//! SHA-256 of the password (truncated for AES-128). Nonces are random per frame.

use std::fmt;
use std::io;
use std::sync::Arc;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::adorn::framed::{FrameCodec, FramedStream};
use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

/// Supported cipher methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMethod {
    Aes128Gcm,
    Aes256Gcm,
}

const METHODS: &[(&str, CipherMethod)] = &[
    ("aes-128-gcm", CipherMethod::Aes128Gcm),
    ("aes-256-gcm", CipherMethod::Aes256Gcm),
];

impl CipherMethod {
    pub fn parse(name: &str) -> Option<Self> {
        METHODS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, m)| *m)
    }

    pub fn name(self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, m)| *m == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }
}

/// Names accepted by [`Cipher::new`].
pub fn cipher_methods() -> Vec<&'static str> {
    METHODS.iter().map(|(n, _)| *n).collect()
}

enum Engine {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

/// A keyed cipher, cheap to clone and share between connections.
#[derive(Clone)]
pub struct Cipher {
    method: CipherMethod,
    engine: Arc<Engine>,
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("method", &self.method.name())
            .finish_non_exhaustive()
    }
}

impl Cipher {
    /// Build a cipher from a method name and password.
    ///
    /// # Errors
    ///
    /// `Error::Config` for an unknown method or an empty password.
    pub fn new(method: &str, password: &str) -> Result<Self> {
        let Some(kind) = CipherMethod::parse(method) else {
            return Err(Error::config(format!(
                "unknown cipher method <{method}>, supported: {}",
                cipher_methods().join(",")
            )));
        };
        if password.is_empty() {
            return Err(Error::config("cipher password required"));
        }

        let key = Sha256::digest(password.as_bytes());
        let engine = match kind {
            CipherMethod::Aes128Gcm => Engine::Aes128(
                Aes128Gcm::new_from_slice(&key[..16]).map_err(|e| Error::config(e.to_string()))?,
            ),
            CipherMethod::Aes256Gcm => Engine::Aes256(
                Aes256Gcm::new_from_slice(&key[..]).map_err(|e| Error::config(e.to_string()))?,
            ),
        };
        Ok(Self {
            method: kind,
            engine: Arc::new(engine),
        })
    }

    pub fn method(&self) -> CipherMethod {
        self.method
    }

    fn seal(&self, plain: &[u8]) -> io::Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce_ga = GenericArray::from_slice(&nonce);
        let sealed = match self.engine.as_ref() {
            Engine::Aes128(c) => c.encrypt(nonce_ga, plain),
            Engine::Aes256(c) => c.encrypt(nonce_ga, plain),
        }
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "encrypt failed"))?;

        let mut body = Vec::with_capacity(NONCE_LEN + sealed.len());
        body.extend_from_slice(&nonce);
        body.extend_from_slice(&sealed);
        Ok(body)
    }

    fn open(&self, body: &[u8]) -> io::Result<Vec<u8>> {
        if body.len() < NONCE_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "short cipher frame"));
        }
        let (nonce, sealed) = body.split_at(NONCE_LEN);
        let nonce_ga = GenericArray::from_slice(nonce);
        match self.engine.as_ref() {
            Engine::Aes128(c) => c.decrypt(nonce_ga, sealed),
            Engine::Aes256(c) => c.decrypt(nonce_ga, sealed),
        }
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "decrypt failed"))
    }
}

impl FrameCodec for Cipher {
    fn encode(&mut self, plain: &[u8]) -> io::Result<Vec<u8>> {
        self.seal(plain)
    }

    fn decode(&mut self, body: &[u8]) -> io::Result<Vec<u8>> {
        self.open(body)
    }
}

/// An encrypted stream.
pub type CipherStream<S> = FramedStream<S, Cipher>;

pub fn encrypt<S>(inner: S, cipher: Cipher) -> CipherStream<S> {
    FramedStream::new(inner, cipher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn unknown_method_is_config_error() {
        let err = Cipher::new("aes-192-cfb", "pass_word").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("aes-192-cfb"));
    }

    #[test]
    fn method_names_round_trip() {
        for name in cipher_methods() {
            assert_eq!(CipherMethod::parse(name).unwrap().name(), name);
        }
    }

    #[test]
    fn wrong_password_fails_to_open() {
        let a = Cipher::new("aes-256-gcm", "one").unwrap();
        let b = Cipher::new("aes-256-gcm", "two").unwrap();
        let body = a.seal(b"secret").unwrap();
        assert!(b.open(&body).is_err());
        assert_eq!(a.open(&body).unwrap(), b"secret");
    }

    #[test]
    fn nonces_differ_per_frame() {
        let c = Cipher::new("aes-128-gcm", "pass_word").unwrap();
        assert_ne!(c.seal(b"same").unwrap(), c.seal(b"same").unwrap());
    }

    #[tokio::test]
    async fn encrypted_pair_exchanges_bytes() {
        let cipher = Cipher::new("aes-128-gcm", "pass_word").unwrap();
        let (a, b) = tokio::io::duplex(4096);
        let mut a = encrypt(a, cipher.clone());
        let mut b = encrypt(b, cipher);

        let want = b"1flkdfladnfadkfna;kdnga;kdnva;ldk;adkfpiehrqeiphr23r[ingkdnv;ifefqiefn";
        a.write_all(want).await.unwrap();
        a.flush().await.unwrap();

        let mut got = vec![0u8; want.len()];
        b.read_exact(&mut got).await.unwrap();
        assert_eq!(&got[..], &want[..]);
    }
}
