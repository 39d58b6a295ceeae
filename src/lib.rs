//! Multi-protocol TCP load balancer toolkit.
//!
//! - [`load_balancer`]: upstreams with hysteresis health probing, pools, strategies
//! - [`adorn`]: stackable connection decorators
//! - [`net`] and [`protocol`]: transports, cancellable dialing, protocol-selecting
//!   dialer and listener, accept loop

pub mod adorn;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod protocol;

pub use config::schema::ProxyConfig;
pub use error::{Error, Result};
pub use lifecycle::Shutdown;
pub use load_balancer::{Upstream, UpstreamPool};
pub use protocol::{Dialer, Protocol};
