//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//! Durations are expressed in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Local listening side.
    pub server: ServerConfig,

    /// Dialer used toward the upstreams.
    pub parent: DialerConfig,

    /// Backend definitions.
    pub upstreams: Vec<UpstreamConfig>,

    /// Upstream selection strategy.
    pub balance: BalanceConfig,

    /// DNS indirection for health probes.
    pub dns: DnsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listening side configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Protocol tag: tcp, tls, stcp or kcp.
    pub protocol: String,

    /// Bind address (e.g., "0.0.0.0:28080").
    pub bind_address: String,

    /// Only used when protocol is tls.
    pub tls: TlsConfig,

    /// Only used when protocol is stcp.
    pub stcp: StcpConfig,

    /// Deflate every frame on the wire.
    pub compress: bool,

    /// Maximum concurrently handled connections, 0 for unbounded.
    pub max_workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: "tcp".to_string(),
            bind_address: "0.0.0.0:28080".to_string(),
            tls: TlsConfig::default(),
            stcp: StcpConfig::default(),
            compress: false,
            max_workers: 0,
        }
    }
}

/// Dialer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DialerConfig {
    /// Protocol tag: tcp, tls, stcp or kcp.
    pub protocol: String,

    /// Connect timeout in milliseconds, 0 for no limit.
    pub timeout_ms: u64,

    /// Only used when protocol is tls.
    pub tls: TlsConfig,

    /// Only used when protocol is stcp.
    pub stcp: StcpConfig,

    /// Deflate every frame on the wire.
    pub compress: bool,

    /// Optional forward proxy, `socks5://[user:pass@]host:port` or `https://[user:pass@]host:port`.
    pub proxy_url: Option<String>,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            protocol: "tcp".to_string(),
            timeout_ms: 2000,
            tls: TlsConfig::default(),
            stcp: StcpConfig::default(),
            compress: false,
            proxy_url: None,
        }
    }
}

impl DialerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// TLS material.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_file: String,

    /// Path to private key file (PEM).
    pub key_file: String,

    /// Trust anchors for the client side; the certificate file is trusted when empty.
    pub ca_file: String,

    /// SNI / verification name; the dial host is used when empty.
    pub server_name: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_file: "proxy.crt".to_string(),
            key_file: "proxy.key".to_string(),
            ca_file: String::new(),
            server_name: String::new(),
        }
    }
}

/// Symmetric cipher settings for stcp.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StcpConfig {
    /// Cipher method, see `adorn::cipher::cipher_methods`.
    pub method: String,

    pub password: String,
}

impl Default for StcpConfig {
    fn default() -> Self {
        Self {
            method: "aes-256-gcm".to_string(),
            password: String::new(),
        }
    }
}

impl StcpConfig {
    /// A known method and a non-empty password.
    pub fn valid(&self) -> bool {
        !self.password.is_empty()
            && crate::adorn::cipher::CipherMethod::parse(&self.method).is_some()
    }
}

/// Backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Consecutive successful probes required to become active.
    pub min_active: u32,

    /// Consecutive failed probes required to become inactive.
    pub max_inactive: u32,

    /// Weight, informational.
    pub weight: u32,

    /// Probe connect timeout in milliseconds.
    pub timeout_ms: u64,

    /// Probe period in milliseconds.
    pub retry_ms: u64,

    /// Persistent multiplexing backend: state follows every probe directly.
    pub mux_check: bool,
}

pub const DEFAULT_MIN_ACTIVE: u32 = 3;
pub const DEFAULT_MAX_INACTIVE: u32 = 3;
pub const DEFAULT_WEIGHT: u32 = 1;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1500;
pub const DEFAULT_RETRY_MS: u64 = 2000;

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            min_active: DEFAULT_MIN_ACTIVE,
            max_inactive: DEFAULT_MAX_INACTIVE,
            weight: DEFAULT_WEIGHT,
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            retry_ms: DEFAULT_RETRY_MS,
            mux_check: false,
        }
    }
}

impl UpstreamConfig {
    /// Config for `address` with every other field defaulted.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_time(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    /// Replace zero values with defaults; an empty address is rejected.
    pub fn normalized(mut self) -> crate::Result<Self> {
        if self.address.is_empty() {
            return Err(crate::Error::config("address required"));
        }
        if self.min_active == 0 {
            self.min_active = DEFAULT_MIN_ACTIVE;
        }
        if self.max_inactive == 0 {
            self.max_inactive = DEFAULT_MAX_INACTIVE;
        }
        if self.weight == 0 {
            self.weight = DEFAULT_WEIGHT;
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = DEFAULT_PROBE_TIMEOUT_MS;
        }
        if self.retry_ms == 0 {
            self.retry_ms = DEFAULT_RETRY_MS;
        }
        Ok(self)
    }
}

/// Upstream selection strategy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    #[default]
    RoundRobin,
    LeastConn,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalanceConfig {
    pub strategy: BalanceStrategy,
}

/// DNS indirection for probes.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DnsConfig {
    /// Resolve upstream addresses before probing.
    pub enabled: bool,

    /// DNS server as `ip` or `ip:port`; empty uses the system resolver.
    pub server: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_fills_zero_fields() {
        let cfg = UpstreamConfig {
            address: "127.0.0.1:80".into(),
            min_active: 0,
            max_inactive: 0,
            weight: 0,
            timeout_ms: 0,
            retry_ms: 0,
            mux_check: false,
        }
        .normalized()
        .unwrap();

        assert_eq!(cfg.min_active, 3);
        assert_eq!(cfg.max_inactive, 3);
        assert_eq!(cfg.weight, 1);
        assert_eq!(cfg.timeout(), Duration::from_millis(1500));
        assert_eq!(cfg.retry_time(), Duration::from_secs(2));
    }

    #[test]
    fn normalized_rejects_empty_address() {
        let err = UpstreamConfig::default().normalized().unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let cfg: ProxyConfig = toml::from_str(
            r#"
            [parent]
            protocol = "stcp"

            [[upstreams]]
            address = "10.0.0.1:80"
            min_active = 1
            "#,
        )
        .unwrap();

        assert_eq!(cfg.parent.protocol, "stcp");
        assert_eq!(cfg.parent.timeout(), Duration::from_secs(2));
        assert_eq!(cfg.upstreams.len(), 1);
        assert_eq!(cfg.upstreams[0].min_active, 1);
        assert_eq!(cfg.upstreams[0].max_inactive, 3);
        assert_eq!(cfg.balance.strategy, BalanceStrategy::RoundRobin);
    }
}
