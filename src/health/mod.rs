//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs), one task per upstream:
//!     Immediate first tick, then every retry_time
//!     → (optional) resolve through the DNS resolver
//!     → dial through the upstream's ConnFactory
//!     → store latency, update state.rs
//!
//! State machine (state.rs):
//!     Inactive ←→ Active
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - State is per-upstream; a crashed loop affects only its own upstream
//! - Readers see the active flag and latency through atomics, never a lock

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::{HealthStatus, Hysteresis};
