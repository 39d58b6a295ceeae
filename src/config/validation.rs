//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate protocol tags and the sub-config each protocol needs
//! - Validate the forward proxy URL
//! - Validate the DNS server address
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Empty upstream addresses are not errors; the pool skips them

use thiserror::Error;
use url::Url;

use crate::config::schema::{DialerConfig, ProxyConfig, StcpConfig, TlsConfig};
use crate::net::resolver::parse_server;
use crate::protocol::Protocol;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{section}: unknown protocol <{protocol}>")]
    UnknownProtocol { section: &'static str, protocol: String },

    #[error("{section}: invalid stcp config (method <{method}>, password required)")]
    InvalidStcp { section: &'static str, method: String },

    #[error("{section}: tls requires cert_file and key_file")]
    MissingTlsMaterial { section: &'static str },

    #[error("parent: invalid proxy url <{0}>")]
    InvalidProxyUrl(String),

    #[error("parent: unknown proxy scheme <{0}>")]
    UnknownProxyScheme(String),

    #[error("observability: invalid metrics address <{0}>")]
    InvalidMetricsAddress(String),

    #[error("dns: invalid server <{0}>, want ip or ip:port")]
    InvalidDnsServer(String),
}

/// Validate a whole configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_protocol(
        "server",
        &config.server.protocol,
        &config.server.tls,
        &config.server.stcp,
        &mut errors,
    );
    check_protocol(
        "parent",
        &config.parent.protocol,
        &config.parent.tls,
        &config.parent.stcp,
        &mut errors,
    );
    check_proxy_url(&config.parent, &mut errors);

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let dns = &config.dns;
    if dns.enabled && !dns.server.is_empty() && parse_server(&dns.server).is_err() {
        errors.push(ValidationError::InvalidDnsServer(dns.server.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_protocol(
    section: &'static str,
    protocol: &str,
    tls: &TlsConfig,
    stcp: &StcpConfig,
    errors: &mut Vec<ValidationError>,
) {
    match protocol.parse::<Protocol>() {
        Ok(Protocol::Tls) => {
            if tls.cert_file.is_empty() || tls.key_file.is_empty() {
                errors.push(ValidationError::MissingTlsMaterial { section });
            }
        }
        Ok(Protocol::Stcp) => {
            if !stcp.valid() {
                errors.push(ValidationError::InvalidStcp {
                    section,
                    method: stcp.method.clone(),
                });
            }
        }
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::UnknownProtocol {
            section,
            protocol: protocol.to_string(),
        }),
    }
}

fn check_proxy_url(parent: &DialerConfig, errors: &mut Vec<ValidationError>) {
    let Some(raw) = parent.proxy_url.as_deref().filter(|s| !s.is_empty()) else {
        return;
    };
    match Url::parse(raw) {
        Ok(url) => {
            if !matches!(url.scheme(), "socks5" | "https") {
                errors.push(ValidationError::UnknownProxyScheme(url.scheme().to_string()));
            }
        }
        Err(_) => errors.push(ValidationError::InvalidProxyUrl(raw.to_string())),
    }
}
