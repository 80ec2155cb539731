//! Connections and the per-connection event loop.
//!
//! A connection is a state machine bound to an endpoint. The driver waits
//! for readability and invokes `on_fillable`; the connection fills until the
//! endpoint would block, then hands control back with a [`Flow`] that says
//! what should happen next. Replacing the bound connection (an upgrade)
//! consumes the old one, so a replaced connection can never receive another
//! event.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::endpoint::Endpoint;

/// What the driver should do after a connection callback returns.
pub enum Flow {
    /// Re-arm read interest and deliver the next readable event.
    FillInterested(Box<dyn Connection>),
    /// The endpoint's bound connection was replaced; open the new one.
    Upgraded(Box<dyn Connection>),
    /// The connection is finished; dropping it closes the endpoint.
    Closed,
}

/// A protocol state machine bound to an endpoint.
///
/// Callbacks consume the connection and give it back inside the returned
/// [`Flow`]; an upgrade is therefore always the last action of a callback.
#[async_trait]
pub trait Connection: Send {
    /// Invoked once when the connection becomes the endpoint's bound
    /// connection.
    async fn on_open(self: Box<Self>) -> Flow;

    /// Invoked when the endpoint has bytes available.
    async fn on_fillable(self: Box<Self>) -> Flow;

    /// The endpoint this connection is bound to.
    fn endpoint_mut(&mut self) -> &mut dyn Endpoint;
}

/// Creates protocol connections for accepted endpoints.
pub trait ConnectionFactory: Send + Sync {
    /// Protocol name this factory is registered under.
    fn protocol(&self) -> &str;

    /// Binds a new connection for `endpoint`.
    fn new_connection(
        &self,
        connector: &Arc<Connector>,
        endpoint: Box<dyn Endpoint>,
    ) -> Box<dyn Connection>;
}

/// Ordered protocol registry shared by every connection of a listener.
///
/// Read-only after construction; decode paths look factories up by name and
/// scan the ordered protocol list to discover the next protocol.
pub struct Connector {
    protocols: Vec<String>,
    factories: HashMap<String, Arc<dyn ConnectionFactory>>,
}

impl Connector {
    /// Builds a connector from factories in protocol order. The first
    /// factory handles freshly accepted connections.
    #[must_use]
    pub fn new(factories: Vec<Arc<dyn ConnectionFactory>>) -> Arc<Self> {
        let protocols = factories
            .iter()
            .map(|f| f.protocol().to_string())
            .collect();
        let factories = factories
            .into_iter()
            .map(|f| (f.protocol().to_ascii_lowercase(), f))
            .collect();
        Arc::new(Self {
            protocols,
            factories,
        })
    }

    /// Protocol names in registration order.
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Looks up a factory by protocol name, case-insensitively.
    #[must_use]
    pub fn connection_factory(&self, name: &str) -> Option<&Arc<dyn ConnectionFactory>> {
        self.factories.get(&name.to_ascii_lowercase())
    }

    /// Factory for the first registered protocol.
    #[must_use]
    pub fn head_factory(&self) -> Option<&Arc<dyn ConnectionFactory>> {
        self.protocols
            .first()
            .and_then(|name| self.connection_factory(name))
    }
}

/// Runs one connection (and everything it upgrades into) to completion.
///
/// Readable events are delivered strictly in order and one at a time; a new
/// fill never starts until the previous callback has returned.
pub async fn drive(conn: Box<dyn Connection>) {
    let mut flow = conn.on_open().await;
    loop {
        match flow {
            Flow::FillInterested(mut conn) => {
                if let Err(e) = conn.endpoint_mut().fill_interested().await {
                    let peer = conn.endpoint_mut().remote_addr();
                    debug!(peer = %peer, error = %e, "connection wait ended");
                    return;
                }
                flow = conn.on_fillable().await;
            }
            Flow::Upgraded(conn) => flow = conn.on_open().await,
            Flow::Closed => return,
        }
    }
}

/// Accept-path helper: binds the head-protocol connection and drives it.
pub async fn serve(connector: Arc<Connector>, endpoint: Box<dyn Endpoint>) {
    let Some(factory) = connector.head_factory() else {
        warn!("no connection factories registered");
        return;
    };
    let conn = factory.new_connection(&connector, endpoint);
    drive(conn).await;
}
