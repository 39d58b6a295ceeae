//! Name resolution used by upstream probes.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::Resolver as HickoryResolver;
use thiserror::Error;

type TokioResolver = HickoryResolver<TokioConnectionProvider>;

const DNS_PORT: u16 = 53;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("resolve {address}: {source}")]
    Lookup {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("resolve {0}: no addresses")]
    Empty(String),

    #[error("resolve {address}: {message}")]
    Dns { address: String, message: String },

    #[error("invalid address <{0}>")]
    Invalid(String),
}

/// Maps `host:port` to `ip:port`.
///
/// `public_dns_addr` returning `None` disables resolution for callers that honour it.
#[async_trait]
pub trait Resolver: Send + Sync + fmt::Debug {
    fn public_dns_addr(&self) -> Option<String>;

    async fn resolve(&self, address: &str) -> Result<String, ResolveError>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver {
    name: Option<String>,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self { name: Some("system".into()) }
    }

    /// A resolver that advertises no DNS server, so callers skip resolution.
    pub fn disabled() -> Self {
        Self { name: None }
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    fn public_dns_addr(&self) -> Option<String> {
        self.name.clone()
    }

    async fn resolve(&self, address: &str) -> Result<String, ResolveError> {
        let mut addrs = tokio::net::lookup_host(address)
            .await
            .map_err(|source| ResolveError::Lookup {
                address: address.to_string(),
                source,
            })?;
        addrs
            .next()
            .map(|a| a.to_string())
            .ok_or_else(|| ResolveError::Empty(address.to_string()))
    }
}

/// Resolver that asks one DNS server directly, bypassing the system configuration.
pub struct DnsServerResolver {
    server: SocketAddr,
    resolver: TokioResolver,
}

impl DnsServerResolver {
    /// `server` is `ip` or `ip:port`; the port defaults to 53.
    pub fn new(server: &str) -> Result<Self, ResolveError> {
        let server = parse_server(server)?;
        let group = NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
        let resolver = HickoryResolver::builder_with_config(
            ResolverConfig::from_parts(None, vec![], group),
            TokioConnectionProvider::default(),
        )
        .with_options(ResolverOpts::default())
        .build();
        Ok(Self { server, resolver })
    }
}

impl fmt::Debug for DnsServerResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsServerResolver")
            .field("server", &self.server)
            .finish()
    }
}

#[async_trait]
impl Resolver for DnsServerResolver {
    fn public_dns_addr(&self) -> Option<String> {
        Some(self.server.to_string())
    }

    async fn resolve(&self, address: &str) -> Result<String, ResolveError> {
        let (host, port) = split_host_port(address)?;
        if host.parse::<IpAddr>().is_ok() {
            return Ok(address.to_string());
        }
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| ResolveError::Dns {
                address: address.to_string(),
                message: e.to_string(),
            })?;
        lookup
            .iter()
            .next()
            .map(|ip| SocketAddr::new(ip, port).to_string())
            .ok_or_else(|| ResolveError::Empty(address.to_string()))
    }
}

/// Parse a DNS server given as `ip` or `ip:port`.
pub fn parse_server(server: &str) -> Result<SocketAddr, ResolveError> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    server
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| ResolveError::Invalid(server.to_string()))
}

fn split_host_port(address: &str) -> Result<(&str, u16), ResolveError> {
    let invalid = || ResolveError::Invalid(address.to_string());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_ip_literals() {
        let r = SystemResolver::new();
        assert_eq!(r.resolve("127.0.0.1:80").await.unwrap(), "127.0.0.1:80");
    }

    #[tokio::test]
    async fn bad_address_is_lookup_error() {
        let err = SystemResolver::new().resolve("no-port-here").await.unwrap_err();
        assert!(matches!(err, ResolveError::Lookup { .. }));
    }

    #[test]
    fn server_port_defaults_to_53() {
        assert_eq!(parse_server("10.0.0.2").unwrap(), "10.0.0.2:53".parse().unwrap());
        assert_eq!(parse_server("10.0.0.2:5353").unwrap(), "10.0.0.2:5353".parse().unwrap());
        assert_eq!(parse_server("[::1]").unwrap(), "[::1]:53".parse().unwrap());
        assert!(matches!(parse_server("dns.local"), Err(ResolveError::Invalid(_))));
    }

    #[tokio::test]
    async fn dns_server_is_advertised() {
        let r = DnsServerResolver::new("127.0.0.1:5353").unwrap();
        assert_eq!(r.public_dns_addr().as_deref(), Some("127.0.0.1:5353"));
    }

    #[tokio::test]
    async fn dns_server_passes_ip_literals_through() {
        let r = DnsServerResolver::new("127.0.0.1").unwrap();
        assert_eq!(r.resolve("10.1.2.3:80").await.unwrap(), "10.1.2.3:80");
        assert_eq!(r.resolve("[::1]:443").await.unwrap(), "[::1]:443");
    }

    #[tokio::test]
    async fn dns_server_rejects_addresses_without_port() {
        let r = DnsServerResolver::new("127.0.0.1").unwrap();
        assert!(matches!(r.resolve("backend").await, Err(ResolveError::Invalid(_))));
        assert!(matches!(r.resolve("backend:http").await, Err(ResolveError::Invalid(_))));
    }

    #[test]
    fn disabled_has_no_dns() {
        assert!(SystemResolver::disabled().public_dns_addr().is_none());
        assert!(SystemResolver::new().public_dns_addr().is_some());
    }
}
