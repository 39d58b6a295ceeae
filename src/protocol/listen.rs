//! Protocol-selecting listener, the accept-side mirror of `Dialer`.

use std::sync::Arc;

use crate::adorn::{Adorn, AdornChain};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::net::listener::Listener;
use crate::net::transport::{TcpTransport, Transport};
use crate::protocol::{build_chain, Protocol};

/// Bind `config.bind_address` with the chain `[tls | cipher, compress, adorns...]`.
///
/// `kcp` supplies the transport for the kcp tag; other tags use it instead of TCP when set.
///
/// # Errors
///
/// `Error::Protocol` for an unknown tag, `Error::Config` for bad tls/stcp material or a
/// kcp tag without transport, `Error::Io` when binding fails.
pub async fn listen(
    config: &ServerConfig,
    adorns: AdornChain,
    transport: Option<Arc<dyn Transport>>,
) -> Result<Listener> {
    let protocol: Protocol = config.protocol.parse()?;
    let base = match protocol {
        Protocol::Tcp => None,
        Protocol::Kcp => {
            if transport.is_none() {
                return Err(Error::config("kcp requires a transport"));
            }
            None
        }
        Protocol::Tls => Some(Adorn::tls_server(config.tls.server_config()?)),
        Protocol::Stcp => {
            if !config.stcp.valid() {
                return Err(Error::config("invalid stcp config"));
            }
            Some(Adorn::cipher(&config.stcp.method, &config.stcp.password)?)
        }
    };
    let chain = build_chain(base, config.compress, &adorns);

    match transport {
        Some(t) => Listener::bind(t.as_ref(), &config.bind_address, chain).await,
        None => Listener::bind(&TcpTransport, &config.bind_address, chain).await,
    }
}
