//! Crate-wide error type.
//!
//! # Design Decisions
//! - Construction problems (bad config, unknown protocol) are returned values, never panics
//! - Probe-loop failures never surface here; they only move the health counters
//! - Dial errors always propagate to the caller synchronously

use thiserror::Error;

/// Errors returned by dialers, listeners and chain construction.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid construction input (empty address, unknown cipher method, bad sub-config).
    #[error("invalid config: {0}")]
    Config(String),

    /// Unknown protocol tag.
    #[error("protocol support one of <tcp|tls|stcp|kcp> but given <{0}>")]
    Protocol(String),

    /// The caller cancelled the dial before it completed.
    #[error("dial cancelled")]
    Cancelled,

    /// Forward proxy handshake failed.
    #[error("proxy: {0}")]
    Proxy(String),

    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// True for the cancellation outcome of a cancellable dial.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
