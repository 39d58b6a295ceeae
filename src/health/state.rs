//! Upstream health state.
//!
//! # States
//! - Inactive (initial): upstream excluded from selection
//! - Active: upstream eligible for selection
//!
//! # State Transitions
//! ```text
//! Inactive → Active: consecutive successes >= min_active
//! Active → Inactive: consecutive failures >= max_inactive
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Each outcome resets the opposite counter, so a single failure restarts activation
//! - The counters live on the probe task; only the resulting flag is shared

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Consecutive-outcome counter deciding the active flag.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    min_active: u32,
    max_inactive: u32,
    successes: u32,
    failures: u32,
    active: bool,
}

impl Hysteresis {
    pub fn new(min_active: u32, max_inactive: u32) -> Self {
        Self {
            min_active: min_active.max(1),
            max_inactive: max_inactive.max(1),
            successes: 0,
            failures: 0,
            active: false,
        }
    }

    /// Record a successful probe. Returns the new state when it flipped.
    pub fn record_success(&mut self) -> Option<bool> {
        self.failures = 0;
        self.successes = self.successes.saturating_add(1);
        if self.successes >= self.min_active && !self.active {
            self.active = true;
            return Some(true);
        }
        None
    }

    /// Record a failed probe. Returns the new state when it flipped.
    pub fn record_failure(&mut self) -> Option<bool> {
        self.successes = 0;
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_inactive && self.active {
            self.active = false;
            return Some(false);
        }
        None
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// State shared between a probe task and its readers. Lock-free.
#[derive(Debug, Default)]
pub struct HealthStatus {
    active: AtomicBool,
    latency_nanos: AtomicU64,
}

impl HealthStatus {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Duration of the latest probe dial.
    pub fn latency(&self) -> Duration {
        Duration::from_nanos(self.latency_nanos.load(Ordering::Relaxed))
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_nanos.store(nanos, Ordering::Relaxed);
    }
}
