//! Library definitions.
//!
//! Exports the endpoint abstraction, connection machinery, and the PROXY
//! protocol preface decoders.

pub mod config;
pub mod core;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

pub use config::{Config, ProxyError, Result};
pub use core::connection::{Connection, ConnectionFactory, Connector, Flow, drive, serve};
pub use core::echo::EchoConnectionFactory;
pub use core::endpoint::{Endpoint, Fill, RewindEndpoint, TcpEndpoint};
pub use core::listener::run_listener;
pub use core::proxy::{
    DEFAULT_MAX_PROXY_HEADER, ProxyConnectionFactory, ProxyEndpoint, TLS_VERSION,
};
