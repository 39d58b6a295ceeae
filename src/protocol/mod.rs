//! Protocol selection.
//!
//! # Data Flow
//! ```text
//! DialerConfig ─→ dialer.rs: forward proxy? → transport by tag → chain → stream
//! ServerConfig ─→ listen.rs: transport by tag → chain → Listener
//! Listener ─────→ server.rs: accept loop → TaskPool → Handler (relay.rs / NopHandler)
//! ```
//!
//! Chains are built so both ends agree: `[tls | cipher, compress, user adorns...]`.

pub mod dialer;
pub mod listen;
pub mod relay;
pub mod server;

use std::fmt;
use std::str::FromStr;

use crate::adorn::{Adorn, AdornChain};
use crate::error::{Error, Result};

pub use dialer::Dialer;
pub use listen::listen;
pub use relay::RelayHandler;
pub use server::{BoundedPool, Handler, NopHandler, Server, TaskPool, UnboundedPool};

/// Wire transport tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Tls,
    Stcp,
    Kcp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Tls => "tls",
            Protocol::Stcp => "stcp",
            Protocol::Kcp => "kcp",
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "tls" => Ok(Protocol::Tls),
            "stcp" => Ok(Protocol::Stcp),
            "kcp" => Ok(Protocol::Kcp),
            other => Err(Error::Protocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[base, compress, adorns...]`, dropping identity compression.
pub(crate) fn build_chain(base: Option<Adorn>, compress: bool, adorns: &AdornChain) -> AdornChain {
    let mut chain = AdornChain::new();
    if let Some(base) = base {
        chain.push(base);
    }
    if compress {
        chain.push(Adorn::compress(true));
    }
    chain.extend(adorns.iter().cloned());
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_tags() {
        for p in [Protocol::Tcp, Protocol::Tls, Protocol::Stcp, Protocol::Kcp] {
            assert_eq!(p.as_str().parse::<Protocol>().unwrap(), p);
        }
    }

    #[test]
    fn unknown_tag_is_protocol_error() {
        let err = "quic".parse::<Protocol>().unwrap_err();
        assert!(matches!(err, Error::Protocol(ref p) if p == "quic"));
        assert_eq!(
            err.to_string(),
            "protocol support one of <tcp|tls|stcp|kcp> but given <quic>"
        );
    }

    #[test]
    fn chain_layout() {
        let user = AdornChain::from(vec![Adorn::identity()]);
        let chain = build_chain(Some(Adorn::cipher("aes-128-gcm", "pw").unwrap()), true, &user);
        assert_eq!(chain.names(), vec!["cipher", "compress", "identity"]);
        assert!(build_chain(None, false, &AdornChain::new()).is_empty());
    }
}
