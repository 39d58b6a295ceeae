//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use lb_proxy::config::TlsConfig;
use lb_proxy::net::{boxed, factory_fn, BoxStream, ConnFactory};

/// Start an echo backend on an ephemeral port.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = socket.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// An in-memory stream whose peer stays open.
pub fn memory_stream() -> BoxStream {
    let (a, b) = tokio::io::duplex(64);
    tokio::spawn(async move {
        let mut b = b;
        let mut sink = Vec::new();
        let _ = b.read_to_end(&mut sink).await;
    });
    boxed(a)
}

/// Factory failing its first `failures` dials, succeeding afterwards. Counts every dial.
pub fn flaky_factory(failures: usize, calls: Arc<AtomicUsize>) -> Arc<dyn ConnFactory> {
    Arc::new(factory_fn(move |_addr, _timeout| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < failures {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "scripted failure"))
            } else {
                Ok(memory_stream())
            }
        }
    }))
}

/// Factory following a switch: dials succeed while `up` is true.
pub fn switch_factory(up: Arc<AtomicBool>) -> Arc<dyn ConnFactory> {
    Arc::new(factory_fn(move |_addr, _timeout| {
        let ok = up.load(Ordering::SeqCst);
        async move {
            if ok {
                Ok(memory_stream())
            } else {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "switched off"))
            }
        }
    }))
}

/// Factory replaying `script`: `true` succeeds, `false` fails, then succeeds forever.
pub fn scripted_factory(script: Vec<bool>) -> Arc<dyn ConnFactory> {
    let calls = Arc::new(AtomicUsize::new(0));
    Arc::new(factory_fn(move |_addr, _timeout| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        let ok = script.get(n).copied().unwrap_or(true);
        async move {
            if ok {
                Ok(memory_stream())
            } else {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "scripted failure"))
            }
        }
    }))
}

/// Factory that takes `delay` before dialing plain TCP.
pub fn slow_factory(delay: Duration) -> Arc<dyn ConnFactory> {
    Arc::new(factory_fn(move |addr: String, _timeout| async move {
        tokio::time::sleep(delay).await;
        let stream = TcpStream::connect(addr).await?;
        Ok::<_, io::Error>(boxed(stream))
    }))
}

/// CA plus a "localhost" leaf signed by it, written as PEM files.
pub struct TestPki {
    pub dir: TempDir,
    pub tls: TlsConfig,
}

pub fn test_pki() -> TestPki {
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

    let dir = tempfile::tempdir().unwrap();

    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca = ca_params.self_signed(&ca_key).unwrap();

    let leaf_key = KeyPair::generate().unwrap();
    let leaf = CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .signed_by(&leaf_key, &ca, &ca_key)
        .unwrap();

    let cert_file = dir.path().join("proxy.crt");
    let key_file = dir.path().join("proxy.key");
    let ca_file = dir.path().join("ca.crt");
    std::fs::write(&cert_file, leaf.pem()).unwrap();
    std::fs::write(&key_file, leaf_key.serialize_pem()).unwrap();
    std::fs::write(&ca_file, ca.pem()).unwrap();

    let tls = TlsConfig {
        cert_file: cert_file.to_string_lossy().into_owned(),
        key_file: key_file.to_string_lossy().into_owned(),
        ca_file: ca_file.to_string_lossy().into_owned(),
        server_name: "localhost".to_string(),
    };
    TestPki { dir, tls }
}

/// Write `data`, read the same amount back.
pub async fn echo_round_trip(conn: &mut BoxStream, data: &[u8]) -> Vec<u8> {
    conn.write_all(data).await.unwrap();
    conn.flush().await.unwrap();
    let mut got = vec![0u8; data.len()];
    tokio::time::timeout(Duration::from_secs(5), conn.read_exact(&mut got))
        .await
        .expect("echo timed out")
        .unwrap();
    got
}

/// Poll `cond` every 10ms for up to `limit`.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

async fn relay(mut client: TcpStream, target: &str) -> io::Result<()> {
    let mut upstream = TcpStream::connect(target).await?;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}

/// Minimal SOCKS5 server: no auth, CONNECT to IPv4 or domain targets.
pub async fn start_socks5_proxy() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut head = [0u8; 2];
                socket.read_exact(&mut head).await?;
                let mut methods = vec![0u8; head[1] as usize];
                socket.read_exact(&mut methods).await?;
                socket.write_all(&[0x05, 0x00]).await?;

                let mut req = [0u8; 4];
                socket.read_exact(&mut req).await?;
                let host = match req[3] {
                    0x01 => {
                        let mut ip = [0u8; 4];
                        socket.read_exact(&mut ip).await?;
                        std::net::Ipv4Addr::from(ip).to_string()
                    }
                    _ => {
                        let mut len = [0u8; 1];
                        socket.read_exact(&mut len).await?;
                        let mut name = vec![0u8; len[0] as usize];
                        socket.read_exact(&mut name).await?;
                        String::from_utf8_lossy(&name).into_owned()
                    }
                };
                let mut port = [0u8; 2];
                socket.read_exact(&mut port).await?;
                let target = format!("{host}:{}", u16::from_be_bytes(port));
                socket
                    .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                    .await?;
                relay(socket, &target).await
            });
        }
    });
    addr
}

/// Minimal HTTP CONNECT proxy requiring `Proxy-Authorization: Basic <basic>` when set.
pub async fn start_connect_proxy(basic: Option<&'static str>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    socket.read_exact(&mut byte).await?;
                    head.push(byte[0]);
                }
                let head = String::from_utf8_lossy(&head).into_owned();
                let target = head
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                if let Some(basic) = basic {
                    let expected = format!("Proxy-Authorization: Basic {basic}\r\n");
                    if !head.contains(&expected) {
                        socket
                            .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                            .await?;
                        return Ok(());
                    }
                }
                socket
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await?;
                relay(socket, &target).await
            });
        }
    });
    addr
}
