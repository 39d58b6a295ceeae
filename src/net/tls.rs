//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::config::TlsConfig;
use crate::error::{Error, Result};

/// Load every certificate from a PEM file.
pub fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", path),
        ));
    }
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no certificate in {:?}", path),
        ));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", path),
        ));
    }
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no private key in {:?}", path),
        )
    })
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

impl TlsConfig {
    /// Client side: trust `ca_file`, or the certificate file itself when no CA is set.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let anchors = if self.ca_file.is_empty() {
            &self.cert_file
        } else {
            &self.ca_file
        };
        let mut roots = RootCertStore::empty();
        for cert in load_certs(Path::new(anchors))? {
            roots.add(cert)?;
        }
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Arc::new(config))
    }

    /// Server side: present `cert_file` / `key_file`.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let certs = load_certs(Path::new(&self.cert_file))?;
        let key = load_private_key(Path::new(&self.key_file))?;
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Arc::new(config))
    }

    /// Name to verify: `server_name` when set, otherwise the host part of `address`.
    pub fn server_name_for(&self, address: &str) -> Result<ServerName<'static>> {
        let host = if self.server_name.is_empty() {
            split_host_port(address).map(|(h, _)| h).unwrap_or(address)
        } else {
            self.server_name.as_str()
        };
        ServerName::try_from(host.to_string())
            .map_err(|e| Error::config(format!("invalid tls server name <{host}>: {e}")))
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_host_port_variants() {
        assert_eq!(split_host_port("example.com:443"), Some(("example.com", 443)));
        assert_eq!(split_host_port("[::1]:8080"), Some(("::1", 8080)));
        assert_eq!(split_host_port("no-port"), None);
        assert_eq!(split_host_port("host:http"), None);
    }

    #[test]
    fn server_name_prefers_config() {
        let mut tls = TlsConfig::default();
        assert_eq!(
            tls.server_name_for("127.0.0.1:443").unwrap(),
            ServerName::try_from("127.0.0.1").unwrap()
        );
        tls.server_name = "localhost".into();
        assert_eq!(
            tls.server_name_for("127.0.0.1:443").unwrap(),
            ServerName::try_from("localhost").unwrap()
        );
    }

    #[test]
    fn missing_certificate_is_reported() {
        let tls = TlsConfig {
            cert_file: "/nonexistent/proxy.crt".into(),
            ..TlsConfig::default()
        };
        let err = tls.client_config().unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }
}
