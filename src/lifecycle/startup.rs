//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the parent dialer and the upstream pool from configuration
//! - Bind the local listener
//! - Run the accept loop until shutdown, then stop every probe loop
//!
//! # Design Decisions
//! - Fail fast: any startup error is returned before traffic is accepted
//! - Reloads keep unchanged upstreams; removed ones stop after the swap

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;

use crate::adorn::AdornChain;
use crate::config::{DnsConfig, ProxyConfig, UpstreamConfig};
use crate::error::{Error, Result};
use crate::lifecycle::shutdown::Shutdown;
use crate::load_balancer::{balancer, UpstreamPool};
use crate::net::listener::Listener;
use crate::net::resolver::{DnsServerResolver, Resolver, SystemResolver};
use crate::protocol::{listen, BoundedPool, Dialer, RelayHandler, Server, TaskPool, UnboundedPool};

/// A configured, bound proxy ready to run.
pub struct App {
    config: ProxyConfig,
    listener: Listener,
    dialer: Arc<Dialer>,
    pool: Arc<ArcSwap<UpstreamPool>>,
    resolver: Option<Arc<dyn Resolver>>,
    shutdown: Shutdown,
}

impl App {
    /// Build every subsystem in order: dialer, upstream pool, listener.
    pub async fn build(config: ProxyConfig) -> Result<Self> {
        let dialer = Arc::new(Dialer::new(config.parent.clone())?);

        let resolver = build_resolver(&config.dns)?;
        let pool = UpstreamPool::new(config.upstreams.clone(), resolver.clone());

        let listener = match listen(&config.server, AdornChain::new(), None).await {
            Ok(l) => l,
            Err(e) => {
                pool.stop();
                return Err(e);
            }
        };

        tracing::info!(
            protocol = %config.server.protocol,
            address = %listener.local_addr()?,
            parent = %config.parent.protocol,
            upstreams = pool.len(),
            "Proxy ready"
        );

        Ok(Self {
            config,
            listener,
            dialer,
            pool: Arc::new(ArcSwap::from_pointee(pool)),
            resolver,
            shutdown: Shutdown::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn pool(&self) -> Arc<ArcSwap<UpstreamPool>> {
        self.pool.clone()
    }

    /// Replace the upstream set. Unchanged upstreams keep probing with their current
    /// state; removed ones are stopped.
    pub fn reload_upstreams(&self, configs: Vec<UpstreamConfig>) {
        reload(&self.pool, configs, self.resolver.clone());
    }

    /// Apply configuration updates from `updates` until shutdown.
    pub fn watch_updates(&self, mut updates: mpsc::UnboundedReceiver<ProxyConfig>) {
        let pool = self.pool.clone();
        let resolver = self.resolver.clone();
        let stop = self.shutdown.subscribe().recv();
        tokio::spawn(async move {
            tokio::pin!(stop);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    update = updates.recv() => match update {
                        Some(config) => reload(&pool, config.upstreams, resolver.clone()),
                        None => break,
                    },
                }
            }
        });
    }

    /// Serve until shutdown is triggered, then stop the pool.
    pub async fn run(self) {
        let handler = RelayHandler::new(
            self.pool.clone(),
            balancer(self.config.balance.strategy),
            self.dialer.clone(),
        );
        let workers: Arc<dyn TaskPool> = match self.config.server.max_workers {
            0 => Arc::new(UnboundedPool),
            n => Arc::new(BoundedPool::new(n)),
        };
        let server = Server::new(self.listener)
            .with_handler(Arc::new(handler))
            .with_pool(workers);

        server.serve_until(self.shutdown.subscribe().recv()).await;
        self.pool.load().stop();
        tracing::info!("Shutdown complete");
    }
}

fn build_resolver(dns: &DnsConfig) -> Result<Option<Arc<dyn Resolver>>> {
    if !dns.enabled {
        return Ok(None);
    }
    if dns.server.is_empty() {
        return Ok(Some(Arc::new(SystemResolver::new())));
    }
    let resolver = DnsServerResolver::new(&dns.server).map_err(|e| Error::config(e.to_string()))?;
    tracing::info!(server = %dns.server, "Health checks resolve through DNS server");
    Ok(Some(Arc::new(resolver)))
}

fn reload(
    pool: &ArcSwap<UpstreamPool>,
    configs: Vec<UpstreamConfig>,
    resolver: Option<Arc<dyn Resolver>>,
) {
    let current = pool.load_full();
    let Some((next, removed)) = current.reconcile(configs, resolver) else {
        tracing::debug!(upstreams = current.len(), "Upstreams unchanged");
        return;
    };
    let kept = current.len() - removed.len();
    let added = next.len() - kept;
    pool.store(Arc::new(next));
    for upstream in &removed {
        upstream.stop_heart_check();
    }
    tracing::info!(
        upstreams = pool.load().len(),
        added,
        removed = removed.len(),
        "Upstreams reloaded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.server.bind_address = "127.0.0.1:0".into();
        config.upstreams = vec![UpstreamConfig::new("127.0.0.1:1")];
        config
    }

    #[tokio::test]
    async fn reload_stops_previous_pool() {
        let app = App::build(config()).await.unwrap();
        let before = app.pool().load_full();
        assert_eq!(before.len(), 1);

        app.reload_upstreams(vec![
            UpstreamConfig::new("127.0.0.1:2"),
            UpstreamConfig::new("127.0.0.1:3"),
        ]);
        assert!(before.backends()[0].is_stopped());
        assert_eq!(app.pool().load().len(), 2);
        app.pool().load().stop();
    }

    #[tokio::test]
    async fn bad_parent_fails_fast() {
        let mut cfg = config();
        cfg.parent.protocol = "smoke".into();
        assert!(matches!(App::build(cfg).await, Err(crate::Error::Protocol(_))));
    }

    #[tokio::test]
    async fn dns_server_selects_resolver() {
        let off = DnsConfig::default();
        assert!(build_resolver(&off).unwrap().is_none());

        let system = DnsConfig {
            enabled: true,
            server: String::new(),
        };
        let r = build_resolver(&system).unwrap().unwrap();
        assert_eq!(r.public_dns_addr().as_deref(), Some("system"));

        let direct = DnsConfig {
            enabled: true,
            server: "10.0.0.53".into(),
        };
        let r = build_resolver(&direct).unwrap().unwrap();
        assert_eq!(r.public_dns_addr().as_deref(), Some("10.0.0.53:53"));

        let bad = DnsConfig {
            enabled: true,
            server: "resolver.local".into(),
        };
        assert!(matches!(build_resolver(&bad), Err(crate::Error::Config(_))));
    }
}
