//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! dial:   ConnFactory (tcp | forward proxy | injected) → before → chain → before → caller
//! listen: Acceptor → raw stream → chain (on the connection task) → handler
//! ```
//!
//! # Design Decisions
//! - Every stream is a `BoxStream` so decorators stack without generics leaking out
//! - Transports are trait objects; tests and kcp plug in their own

pub mod dial;
pub mod listener;
pub mod proxy;
pub mod resolver;
pub mod stream;
pub mod tls;
pub mod transport;

pub use dial::{dial_with_cancel, Client};
pub use listener::Listener;
pub use proxy::{ForwardProxy, ProxyAuth};
pub use resolver::{ResolveError, Resolver, SystemResolver};
pub use stream::{boxed, AsyncStream, BoxStream};
pub use transport::{factory_fn, Acceptor, ConnFactory, TcpTransport, Transport};
