//! Active health checking.
//!
//! # Responsibilities
//! - Periodically dial one upstream
//! - Fold outcomes into the hysteresis counter (standard) or follow each dial (mux)
//! - Record the latest dial latency
//!
//! A panic inside one iteration is caught, logged, and ends this upstream's loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::UpstreamConfig;
use crate::health::state::{HealthStatus, Hysteresis};
use crate::net::resolver::Resolver;
use crate::net::stream::BoxStream;
use crate::net::transport::ConnFactory;
use crate::observability::metrics;

/// One upstream's probe loop.
pub struct HealthMonitor {
    config: UpstreamConfig,
    factory: Arc<dyn ConnFactory>,
    resolver: Option<Arc<dyn Resolver>>,
    status: Arc<HealthStatus>,
}

impl HealthMonitor {
    pub fn new(
        config: UpstreamConfig,
        factory: Arc<dyn ConnFactory>,
        resolver: Option<Arc<dyn Resolver>>,
        status: Arc<HealthStatus>,
    ) -> Self {
        Self {
            config,
            factory,
            resolver,
            status,
        }
    }

    /// Probe now and every `retry_time` until `stop` turns true or its sender is dropped.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let address = self.config.address.clone();
        tracing::debug!(
            address = %address,
            retry_ms = self.config.retry_ms,
            mux = self.config.mux_check,
            "Health monitor starting"
        );
        metrics::record_upstream_active(&address, self.status.is_active());

        let mut ticker = time::interval(self.config.retry_time());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut counter = Hysteresis::new(self.config.min_active, self.config.max_inactive);

        loop {
            tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => {
                    tracing::debug!(address = %address, "Health monitor stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let iteration = AssertUnwindSafe(self.check_once(&mut counter))
                .catch_unwind()
                .await;
            if let Err(panic) = iteration {
                tracing::error!(
                    address = %address,
                    panic = %panic_message(panic.as_ref()),
                    "Health monitor crashed, probing stopped"
                );
                break;
            }
        }
    }

    async fn check_once(&self, counter: &mut Hysteresis) {
        let started = Instant::now();
        let target = self.target_address().await;
        let dialed = self.factory.connect(&target, self.config.timeout()).await;
        let elapsed = started.elapsed();
        self.status.set_latency(elapsed);
        metrics::record_probe_latency(&self.config.address, elapsed);

        if self.config.mux_check {
            self.follow_dial(dialed).await;
            return;
        }

        let flipped = match dialed {
            Ok(mut conn) => {
                let _ = conn.shutdown().await;
                counter.record_success()
            }
            Err(e) => {
                tracing::debug!(address = %self.config.address, error = %e, "Probe failed");
                counter.record_failure()
            }
        };
        if let Some(active) = flipped {
            self.publish(active);
        }
    }

    /// Mux mode: the flag follows every dial, then one exploratory read.
    async fn follow_dial(&self, dialed: std::io::Result<BoxStream>) {
        let active = dialed.is_ok();
        if active != self.status.is_active() {
            self.publish(active);
        }
        match dialed {
            Ok(mut conn) => {
                let mut buf = [0u8; 1];
                let _ = time::timeout(self.read_limit(), conn.read(&mut buf)).await;
            }
            Err(e) => {
                tracing::debug!(address = %self.config.address, error = %e, "Probe failed");
            }
        }
    }

    fn read_limit(&self) -> Duration {
        let t = self.config.timeout();
        if t.is_zero() {
            self.config.retry_time()
        } else {
            t
        }
    }

    fn publish(&self, active: bool) {
        self.status.set_active(active);
        metrics::record_upstream_active(&self.config.address, active);
        tracing::info!(
            address = %self.config.address,
            active,
            latency_ms = self.status.latency().as_millis() as u64,
            "Upstream state changed"
        );
    }

    async fn target_address(&self) -> String {
        let address = &self.config.address;
        let Some(resolver) = &self.resolver else {
            return address.clone();
        };
        if resolver.public_dns_addr().map_or(true, |a| a.is_empty()) {
            return address.clone();
        }
        match resolver.resolve(address).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(address = %address, error = %e, "DNS resolve failed");
                address.clone()
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
