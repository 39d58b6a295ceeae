//! Protocol-selecting dialer.
//!
//! # Responsibilities
//! - Build the forward proxy from `proxy_url`
//! - Pick the base decorator by protocol tag (tls handshake, stcp cipher)
//! - Dial through a `Client`, cancellable
//!
//! Sub-configs are loaded once at construction: bad TLS material or an invalid stcp
//! config is a construction error, never a per-dial one.

use std::future::Future;
use std::sync::Arc;

use crate::adorn::{Adorn, AdornChain};
use crate::config::DialerConfig;
use crate::error::{Error, Result};
use crate::net::dial::Client;
use crate::net::proxy::ForwardProxy;
use crate::net::stream::BoxStream;
use crate::net::transport::{ConnFactory, TcpTransport};
use crate::protocol::{build_chain, Protocol};

/// Dialer for one `DialerConfig`.
#[derive(Debug, Clone)]
pub struct Dialer {
    protocol: Protocol,
    config: DialerConfig,
    base: Option<Adorn>,
    tls: Option<Arc<rustls::ClientConfig>>,
    forward: Option<Arc<ForwardProxy>>,
    transport: Arc<dyn ConnFactory>,
    kcp: Option<Arc<dyn ConnFactory>>,
    before: AdornChain,
    adorns: AdornChain,
    client: Client,
}

impl Dialer {
    /// # Errors
    ///
    /// `Error::Protocol` for an unknown tag; `Error::Config` for an invalid stcp config,
    /// a bad proxy URL or unusable TLS material.
    pub fn new(config: DialerConfig) -> Result<Self> {
        let protocol: Protocol = config.protocol.parse()?;

        let forward = match config.proxy_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => Some(Arc::new(ForwardProxy::parse(url, config.timeout())?)),
            None => None,
        };

        let mut tls = None;
        let base = match protocol {
            Protocol::Tcp | Protocol::Kcp => None,
            Protocol::Tls => {
                let client_config = config.tls.client_config()?;
                tls = Some(client_config.clone());
                if config.tls.server_name.is_empty() {
                    // Named per dial after the target host.
                    None
                } else {
                    let name = config.tls.server_name_for("")?;
                    Some(Adorn::tls_client(client_config, name))
                }
            }
            Protocol::Stcp => {
                if !config.stcp.valid() {
                    return Err(Error::config("invalid stcp config"));
                }
                Some(Adorn::cipher(&config.stcp.method, &config.stcp.password)?)
            }
        };

        let mut dialer = Self {
            protocol,
            client: Client::new(config.timeout()),
            config,
            base,
            tls,
            forward,
            transport: Arc::new(TcpTransport),
            kcp: None,
            before: AdornChain::new(),
            adorns: AdornChain::new(),
        };
        dialer.rebuild();
        Ok(dialer)
    }

    fn rebuild(&mut self) {
        self.client = self.make_client(self.base.clone());
    }

    fn make_client(&self, base: Option<Adorn>) -> Client {
        let chain = build_chain(base, self.config.compress, &self.adorns);
        let client = Client::new(self.config.timeout()).with_before(self.before.clone());
        match self.protocol {
            Protocol::Kcp => {
                let client = client.with_after(chain);
                match &self.kcp {
                    Some(kcp) => client.with_transport(kcp.clone()),
                    None => client,
                }
            }
            _ => {
                let client = client.with_chain(chain).with_transport(self.transport.clone());
                match &self.forward {
                    Some(forward) => client.with_forward(forward.clone()),
                    None => client,
                }
            }
        }
    }

    fn client_for(&self, address: &str) -> Result<Client> {
        match &self.tls {
            Some(tls) if self.base.is_none() => {
                let name = self.config.tls.server_name_for(address)?;
                Ok(self.make_client(Some(Adorn::tls_client(tls.clone(), name))))
            }
            _ => Ok(self.client.clone()),
        }
    }

    /// Append a user decorator after the protocol ones.
    pub fn with_adorn(mut self, adorn: Adorn) -> Self {
        self.adorns.push(adorn);
        self.rebuild();
        self
    }

    /// Decorators applied around the main chain, see [`Client`].
    pub fn with_before(mut self, before: AdornChain) -> Self {
        self.before = before;
        self.rebuild();
        self
    }

    /// Replace direct TCP for tcp, tls and stcp.
    pub fn with_transport(mut self, transport: Arc<dyn ConnFactory>) -> Self {
        self.transport = transport;
        self.rebuild();
        self
    }

    /// The transport used by the kcp tag.
    pub fn with_kcp_transport(mut self, kcp: Arc<dyn ConnFactory>) -> Self {
        self.kcp = Some(kcp);
        self.rebuild();
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    fn check_kcp(&self) -> Result<()> {
        if self.protocol == Protocol::Kcp && self.kcp.is_none() {
            return Err(Error::config("kcp requires a transport"));
        }
        Ok(())
    }

    pub async fn dial(&self, address: &str) -> Result<BoxStream> {
        self.check_kcp()?;
        let client = self.client_for(address)?;
        match self.protocol {
            Protocol::Kcp => client.dial_session(address).await,
            _ => client.dial(address).await,
        }
    }

    /// Dial, returning `Error::Cancelled` if `cancel` resolves first.
    pub async fn dial_with_cancel<C>(&self, address: &str, cancel: C) -> Result<BoxStream>
    where
        C: Future<Output = ()>,
    {
        self.check_kcp()?;
        let client = self.client_for(address)?;
        match self.protocol {
            Protocol::Kcp => client.dial_session_with_cancel(address, cancel).await,
            _ => client.dial_with_cancel(address, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(protocol: &str) -> DialerConfig {
        DialerConfig {
            protocol: protocol.into(),
            ..DialerConfig::default()
        }
    }

    #[test]
    fn unknown_protocol() {
        let err = Dialer::new(config("udp")).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn stcp_requires_password() {
        let err = Dialer::new(config("stcp")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn bad_proxy_scheme() {
        let cfg = DialerConfig {
            proxy_url: Some("ftp://127.0.0.1:21".into()),
            ..config("tcp")
        };
        assert!(matches!(Dialer::new(cfg).unwrap_err(), Error::Config(_)));
    }

    #[tokio::test]
    async fn kcp_without_transport() {
        let d = Dialer::new(config("kcp")).unwrap();
        let err = d.dial("127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
