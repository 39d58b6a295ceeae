//! Forward proxies: SOCKS5 (RFC 1928 / RFC 1929) and HTTP CONNECT.
//!
//! Both implement [`ConnFactory`], so a `Client` can dial through them exactly as it
//! dials directly. The returned stream is the tunnel to the requested address.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use crate::error::{Error, Result};
use crate::net::stream::{boxed, BoxStream};
use crate::net::tls::split_host_port;
use crate::net::transport::{with_timeout, ConnFactory};

const MAX_CONNECT_HEADER: usize = 8 * 1024;

/// Credentials taken from the proxy URL's userinfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAuth {
    pub user: String,
    pub password: String,
}

impl ProxyAuth {
    pub fn from_url(url: &Url) -> Option<Self> {
        if url.username().is_empty() {
            return None;
        }
        Some(Self {
            user: url.username().to_string(),
            password: url.password().unwrap_or_default().to_string(),
        })
    }

    fn basic(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.user, self.password))
    }
}

/// A proxy the client tunnels through.
#[derive(Debug, Clone)]
pub enum ForwardProxy {
    Socks5 {
        host: String,
        timeout: Duration,
        auth: Option<ProxyAuth>,
    },
    Https {
        host: String,
        timeout: Duration,
        auth: Option<ProxyAuth>,
    },
}

impl ForwardProxy {
    /// Build from a `socks5://` or `https://` URL.
    ///
    /// # Errors
    ///
    /// `Error::Config` for any other scheme or a URL without host.
    pub fn from_url(url: &Url, timeout: Duration) -> Result<Self> {
        let host = match (url.host_str(), url.port_or_known_default()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => format!("{h}:1080"),
            (None, _) => return Err(Error::config(format!("proxy url without host: {url}"))),
        };
        let auth = ProxyAuth::from_url(url);
        match url.scheme() {
            "socks5" => Ok(Self::Socks5 { host, timeout, auth }),
            "https" => Ok(Self::Https { host, timeout, auth }),
            _ => Err(Error::config(format!("unknown scheme of {url}"))),
        }
    }

    pub fn parse(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::config(format!("proxy url <{url}>: {e}")))?;
        Self::from_url(&url, timeout)
    }

    pub fn host(&self) -> &str {
        match self {
            Self::Socks5 { host, .. } | Self::Https { host, .. } => host,
        }
    }
}

#[async_trait]
impl ConnFactory for ForwardProxy {
    async fn connect(&self, address: &str, timeout: Duration) -> io::Result<BoxStream> {
        let (proxy_timeout, auth) = match self {
            Self::Socks5 { timeout, auth, .. } | Self::Https { timeout, auth, .. } => {
                (*timeout, auth.as_ref())
            }
        };
        // The tighter of the two limits bounds the whole tunnel setup.
        let limit = match (proxy_timeout.is_zero(), timeout.is_zero()) {
            (true, _) => timeout,
            (_, true) => proxy_timeout,
            _ => proxy_timeout.min(timeout),
        };
        let host = self.host().to_string();
        let target = address.to_string();
        let is_socks = matches!(self, Self::Socks5 { .. });

        with_timeout(limit, "proxy tunnel", async move {
            let mut stream = TcpStream::connect(&host).await?;
            stream.set_nodelay(true)?;
            if is_socks {
                socks5_handshake(&mut stream, &target, auth).await?;
            } else {
                http_connect(&mut stream, &target, auth).await?;
            }
            tracing::debug!(proxy = %host, target = %target, "proxy tunnel established");
            Ok(boxed(stream))
        })
        .await
    }
}

fn proxy_err(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::Other, Error::Proxy(msg.into()))
}

/// SOCKS5 CONNECT to `target`, with username/password auth when `auth` is set.
pub async fn socks5_handshake<S>(
    stream: &mut S,
    target: &str,
    auth: Option<&ProxyAuth>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (host, port) =
        split_host_port(target).ok_or_else(|| proxy_err(format!("bad target address <{target}>")))?;

    let methods: &[u8] = if auth.is_some() { &[0x00, 0x02] } else { &[0x00] };
    let mut greeting = vec![0x05, methods.len() as u8];
    greeting.extend_from_slice(methods);
    stream.write_all(&greeting).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 0x05 {
        return Err(proxy_err(format!("socks version {} not supported", reply[0])));
    }
    match (reply[1], auth) {
        (0x00, _) => {}
        (0x02, Some(auth)) => {
            if auth.user.len() > 255 || auth.password.len() > 255 {
                return Err(proxy_err("socks credentials too long"));
            }
            let mut req = vec![0x01, auth.user.len() as u8];
            req.extend_from_slice(auth.user.as_bytes());
            req.push(auth.password.len() as u8);
            req.extend_from_slice(auth.password.as_bytes());
            stream.write_all(&req).await?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await?;
            if status[1] != 0x00 {
                return Err(proxy_err("socks authentication rejected"));
            }
        }
        (0xff, _) => return Err(proxy_err("socks proxy accepted no auth method")),
        (m, _) => return Err(proxy_err(format!("socks proxy chose unsupported method {m}"))),
    }

    let mut req = vec![0x05, 0x01, 0x00];
    match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(ip)) => {
            req.push(0x01);
            req.extend_from_slice(&ip.octets());
        }
        Ok(std::net::IpAddr::V6(ip)) => {
            req.push(0x04);
            req.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(proxy_err("socks target host too long"));
            }
            req.push(0x03);
            req.push(host.len() as u8);
            req.extend_from_slice(host.as_bytes());
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&req).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(proxy_err(format!("socks connect failed with code {}", head[1])));
    }
    // Drain the bound address.
    let addr_len = match head[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        t => return Err(proxy_err(format!("socks reply with address type {t}"))),
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;
    Ok(())
}

/// HTTP CONNECT to `target`, with Basic proxy authorization when `auth` is set.
pub async fn http_connect<S>(
    stream: &mut S,
    target: &str,
    auth: Option<&ProxyAuth>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut req = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(auth) = auth {
        req.push_str(&format!("Proxy-Authorization: Basic {}\r\n", auth.basic()));
    }
    req.push_str("\r\n");
    stream.write_all(req.as_bytes()).await?;

    // Byte at a time so nothing past the header is consumed.
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_HEADER {
            return Err(proxy_err("CONNECT response header too large"));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "proxy closed during CONNECT",
            ));
        }
        head.push(byte[0]);
    }

    let text = String::from_utf8_lossy(&head);
    let status_line = text.lines().next().unwrap_or_default();
    let code = status_line.split_whitespace().nth(1).unwrap_or_default();
    if code != "200" {
        return Err(proxy_err(format!("CONNECT failed: {status_line}")));
    }
    Ok(())
}
