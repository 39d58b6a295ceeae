//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! On file change (--watch):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → new UpstreamPool swapped in, old pool stopped
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Durations are plain milliseconds
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    BalanceConfig, BalanceStrategy, DialerConfig, DnsConfig, LogFormat, ObservabilityConfig,
    ProxyConfig, ServerConfig, StcpConfig, TlsConfig, UpstreamConfig,
};
