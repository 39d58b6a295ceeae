//! Upstream abstraction.
//!
//! # Responsibilities
//! - Represent one backend target
//! - Own the background probe loop deciding its active flag
//! - Track live connections (for least connections) and the last probe latency
//!
//! # Design Decisions
//! - `active` and latency are written only by the probe task
//! - `connections` is written only by callers bracketing a connection; a decrement
//!   without a matching increment is a caller bug and is not detected
//! - Stopping is idempotent; the probe task also exits when the upstream is dropped

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::config::UpstreamConfig;
use crate::error::Result;
use crate::health::{HealthMonitor, HealthStatus};
use crate::net::resolver::Resolver;
use crate::net::transport::{ConnFactory, TcpTransport};
use crate::observability::metrics;

#[derive(Debug, Default)]
struct Lifecycle {
    started: bool,
    closed: bool,
}

/// A single backend.
pub struct Upstream {
    config: UpstreamConfig,
    factory: Arc<dyn ConnFactory>,
    resolver: Option<Arc<dyn Resolver>>,
    status: Arc<HealthStatus>,
    connections: AtomicI64,
    lifecycle: Mutex<Lifecycle>,
    stop: watch::Sender<bool>,
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("address", &self.config.address)
            .field("active", &self.active())
            .field("connections", &self.conns_count())
            .field("latency", &self.connect_used_time())
            .finish()
    }
}

impl Upstream {
    /// Validate `config` (zero fields take defaults) and build an inactive upstream.
    ///
    /// Probing starts with [`start_heart_check`](Self::start_heart_check).
    ///
    /// # Errors
    ///
    /// `Error::Config` when the address is empty.
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let config = config.normalized()?;
        let (stop, _) = watch::channel(false);
        Ok(Self {
            config,
            factory: Arc::new(TcpTransport),
            resolver: None,
            status: Arc::new(HealthStatus::default()),
            connections: AtomicI64::new(0),
            lifecycle: Mutex::new(Lifecycle::default()),
            stop,
        })
    }

    /// Probe through `factory` instead of direct TCP.
    pub fn with_conn_factory(mut self, factory: Arc<dyn ConnFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Resolve the address through `resolver` before each probe.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the probe loop. Must be called within a Tokio runtime.
    ///
    /// Later calls, and calls after [`stop_heart_check`](Self::stop_heart_check), do nothing.
    pub fn start_heart_check(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.started || lifecycle.closed {
            return;
        }
        lifecycle.started = true;

        let monitor = HealthMonitor::new(
            self.config.clone(),
            self.factory.clone(),
            self.resolver.clone(),
            self.status.clone(),
        );
        tokio::spawn(monitor.run(self.stop.subscribe()));
    }

    /// Stop the probe loop for good. Safe to call any number of times.
    pub fn stop_heart_check(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.closed {
            return;
        }
        lifecycle.closed = true;
        self.stop.send_replace(true);
        tracing::debug!(address = %self.config.address, "Heart check stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.lifecycle().closed
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn active(&self) -> bool {
        self.status.is_active()
    }

    #[cfg(test)]
    pub(crate) fn set_active(&self, active: bool) {
        self.status.set_active(active);
    }

    pub fn conns_count(&self) -> i64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn conns_increase(&self) {
        let n = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_upstream_connections(&self.config.address, n);
    }

    pub fn conns_decrease(&self) {
        let n = self.connections.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::record_upstream_connections(&self.config.address, n);
    }

    /// Duration of the latest probe dial.
    pub fn connect_used_time(&self) -> Duration {
        self.status.latency()
    }

    /// Count a connection until the returned guard is dropped.
    pub fn track(self: &Arc<Self>) -> ConnGuard {
        self.conns_increase();
        ConnGuard {
            upstream: self.clone(),
        }
    }
}

/// A RAII guard that manages the connection count.
#[derive(Debug)]
pub struct ConnGuard {
    upstream: Arc<Upstream>,
}

impl Deref for ConnGuard {
    type Target = Upstream;
    fn deref(&self) -> &Self::Target {
        &self.upstream
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.upstream.conns_decrease();
    }
}
