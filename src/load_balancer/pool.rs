//! Upstream pool management.
//!
//! # Responsibilities
//! - Build upstreams from configuration, skipping invalid entries
//! - Aggregate queries over the fleet
//! - Stop every member's probe loop
//!
//! Lookups by address use the first match. Every operation is a linear scan;
//! pools hold tens of upstreams.

use std::sync::Arc;

use crate::config::UpstreamConfig;
use crate::load_balancer::upstream::Upstream;
use crate::net::resolver::Resolver;
use crate::net::transport::ConnFactory;

/// Ordered collection of upstreams.
#[derive(Debug, Default, Clone)]
pub struct UpstreamPool {
    upstreams: Vec<Arc<Upstream>>,
}

impl UpstreamPool {
    /// Build and start an upstream per valid config, probing over direct TCP.
    pub fn new(configs: Vec<UpstreamConfig>, resolver: Option<Arc<dyn Resolver>>) -> Self {
        Self::with_factory(configs, None, resolver)
    }

    /// Like [`new`](Self::new), probing through `factory` when given.
    pub fn with_factory(
        configs: Vec<UpstreamConfig>,
        factory: Option<Arc<dyn ConnFactory>>,
        resolver: Option<Arc<dyn Resolver>>,
    ) -> Self {
        let mut upstreams = Vec::with_capacity(configs.len());
        for config in configs {
            let upstream = match Upstream::new(config) {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping invalid upstream");
                    continue;
                }
            };
            let upstream = match &factory {
                Some(f) => upstream.with_conn_factory(f.clone()),
                None => upstream,
            };
            let upstream = match &resolver {
                Some(r) => upstream.with_resolver(r.clone()),
                None => upstream,
            };
            upstream.start_heart_check();
            upstreams.push(Arc::new(upstream));
        }
        tracing::info!(upstreams = upstreams.len(), "Upstream pool started");
        Self { upstreams }
    }

    /// Wrap existing upstreams without starting them.
    pub fn from_upstreams(upstreams: Vec<Arc<Upstream>>) -> Self {
        Self { upstreams }
    }

    /// The pool for `configs`, keeping members whose normalized config is unchanged.
    ///
    /// Kept members go on probing with their current state; new ones are started.
    /// Returns the new pool and the members it no longer holds, which the caller stops
    /// once the new pool is published. `None` when the upstream set is unchanged.
    pub fn reconcile(
        &self,
        configs: Vec<UpstreamConfig>,
        resolver: Option<Arc<dyn Resolver>>,
    ) -> Option<(UpstreamPool, Vec<Arc<Upstream>>)> {
        let wanted: Vec<UpstreamConfig> = configs
            .into_iter()
            .filter_map(|c| match c.normalized() {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping invalid upstream");
                    None
                }
            })
            .collect();
        let unchanged = wanted.len() == self.upstreams.len()
            && wanted
                .iter()
                .zip(&self.upstreams)
                .all(|(c, u)| c == u.config() && !u.is_stopped());
        if unchanged {
            return None;
        }

        let mut previous: Vec<Option<Arc<Upstream>>> =
            self.upstreams.iter().cloned().map(Some).collect();
        let mut upstreams = Vec::with_capacity(wanted.len());
        for config in wanted {
            let kept = previous.iter_mut().find_map(|slot| {
                let reusable = slot
                    .as_ref()
                    .is_some_and(|u| u.config() == &config && !u.is_stopped());
                if reusable {
                    slot.take()
                } else {
                    None
                }
            });
            let upstream = match kept {
                Some(u) => u,
                None => {
                    let u = match Upstream::new(config) {
                        Ok(u) => u,
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping invalid upstream");
                            continue;
                        }
                    };
                    let u = match &resolver {
                        Some(r) => u.with_resolver(r.clone()),
                        None => u,
                    };
                    u.start_heart_check();
                    Arc::new(u)
                }
            };
            upstreams.push(upstream);
        }

        let removed = previous.into_iter().flatten().collect();
        Some((Self { upstreams }, removed))
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    /// All members, in configuration order.
    pub fn backends(&self) -> &[Arc<Upstream>] {
        &self.upstreams
    }

    pub fn get(&self, address: &str) -> Option<&Arc<Upstream>> {
        self.upstreams.iter().find(|u| u.address() == address)
    }

    pub fn conns_increase(&self, address: &str) {
        if let Some(u) = self.get(address) {
            u.conns_increase();
        }
    }

    pub fn conns_decrease(&self, address: &str) {
        if let Some(u) = self.get(address) {
            u.conns_decrease();
        }
    }

    pub fn has_active(&self) -> bool {
        self.upstreams.iter().any(|u| u.active())
    }

    pub fn active_count(&self) -> usize {
        self.upstreams.iter().filter(|u| u.active()).count()
    }

    /// Stop every member. Safe to call repeatedly.
    pub fn stop(&self) {
        for u in &self.upstreams {
            u.stop_heart_check();
        }
    }
}
