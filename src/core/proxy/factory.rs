//! Connection factory for the PROXY protocol.
//!
//! Registered in front of any other protocol on a connector, it decodes the
//! PROXY v1 or v2 preface and then upgrades the endpoint to the next
//! protocol's connection.

use std::sync::Arc;

use crate::core::connection::{Connection, ConnectionFactory, Connector};
use crate::core::endpoint::Endpoint;
use crate::core::proxy::detect::DetectConnection;

pub(crate) const PROTOCOL_NAME: &str = "proxy";

/// Default cap on a v2 address+TLV payload, bytes.
pub const DEFAULT_MAX_PROXY_HEADER: u16 = 1024;

/// Factory creating preface decoders for freshly accepted connections.
pub struct ProxyConnectionFactory {
    next_protocol: Option<String>,
    max_proxy_header: u16,
}

impl ProxyConnectionFactory {
    /// `next_protocol` names the protocol to upgrade to once the preface is
    /// decoded; when `None`, the protocol listed immediately after `"proxy"`
    /// on the connector is used. `max_proxy_header` caps the v2 payload.
    #[must_use]
    pub fn new(next_protocol: Option<String>, max_proxy_header: u16) -> Self {
        Self {
            next_protocol,
            max_proxy_header,
        }
    }

    #[must_use]
    pub fn max_proxy_header(&self) -> u16 {
        self.max_proxy_header
    }

    /// Resolves the next-protocol name against the connector's ordered
    /// protocol list. `None` when unset and `"proxy"` is missing or last.
    fn resolve_next(&self, connector: &Connector) -> Option<String> {
        self.next_protocol.clone().or_else(|| {
            let protocols = connector.protocols();
            protocols
                .iter()
                .position(|p| p.eq_ignore_ascii_case(PROTOCOL_NAME))
                .and_then(|i| protocols.get(i + 1))
                .cloned()
        })
    }
}

impl Default for ProxyConnectionFactory {
    fn default() -> Self {
        Self::new(None, DEFAULT_MAX_PROXY_HEADER)
    }
}

impl ConnectionFactory for ProxyConnectionFactory {
    fn protocol(&self) -> &str {
        PROTOCOL_NAME
    }

    fn new_connection(
        &self,
        connector: &Arc<Connector>,
        endpoint: Box<dyn Endpoint>,
    ) -> Box<dyn Connection> {
        Box::new(DetectConnection::new(
            endpoint,
            connector.clone(),
            self.resolve_next(connector),
            usize::from(self.max_proxy_header),
        ))
    }
}
