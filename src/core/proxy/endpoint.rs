//! Endpoint wrapper reporting proxied addresses.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;

use crate::core::endpoint::{Endpoint, Fill};

/// Attribute key for the TLS version carried in a v2 SSL TLV.
pub const TLS_VERSION: &str = "TLS_VERSION";

/// An [`Endpoint`] that reports the addresses decoded from a PROXY preface
/// instead of the kernel's, plus a bag of named attributes. Everything else
/// passes through to the wrapped endpoint untouched.
pub struct ProxyEndpoint {
    inner: Box<dyn Endpoint>,
    remote: SocketAddr,
    local: SocketAddr,
    attributes: HashMap<String, String>,
}

impl ProxyEndpoint {
    #[must_use]
    pub fn new(inner: Box<dyn Endpoint>, remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            inner,
            remote,
            local,
            attributes: HashMap::new(),
        }
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }
}

#[async_trait]
impl Endpoint for ProxyEndpoint {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Fill> {
        self.inner.fill(buf)
    }

    async fn fill_interested(&mut self) -> io::Result<()> {
        self.inner.fill_interested().await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf).await
    }

    async fn shutdown_output(&mut self) {
        self.inner.shutdown_output().await;
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}
