//! Echo protocol.
//!
//! The bundled next protocol: whatever the peer sends after the preface is
//! written straight back. Small enough to stay out of the way, real enough
//! to exercise a decoded connection end to end.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::core::connection::{Connection, ConnectionFactory, Connector, Flow};
use crate::core::endpoint::{Endpoint, Fill};
use crate::core::proxy::TLS_VERSION;

pub struct EchoConnectionFactory;

impl ConnectionFactory for EchoConnectionFactory {
    fn protocol(&self) -> &str {
        "echo"
    }

    fn new_connection(
        &self,
        _connector: &Arc<Connector>,
        endpoint: Box<dyn Endpoint>,
    ) -> Box<dyn Connection> {
        Box::new(EchoConnection { endpoint })
    }
}

struct EchoConnection {
    endpoint: Box<dyn Endpoint>,
}

#[async_trait]
impl Connection for EchoConnection {
    async fn on_open(self: Box<Self>) -> Flow {
        debug!(
            peer = %self.endpoint.remote_addr(),
            local = %self.endpoint.local_addr(),
            tls_version = self.endpoint.attribute(TLS_VERSION),
            "echo session open"
        );
        Flow::FillInterested(self)
    }

    async fn on_fillable(mut self: Box<Self>) -> Flow {
        let mut buf = [0u8; 4096];
        loop {
            match self.endpoint.fill(&mut buf) {
                Ok(Fill::Data(n)) => {
                    if let Err(e) = self.endpoint.write_all(&buf[..n]).await {
                        debug!(peer = %self.endpoint.remote_addr(), error = %e, "echo write failed");
                        return Flow::Closed;
                    }
                }
                Ok(Fill::WouldBlock) => return Flow::FillInterested(self),
                Ok(Fill::Eof) => {
                    self.endpoint.shutdown_output().await;
                    return Flow::Closed;
                }
                Err(e) => {
                    debug!(peer = %self.endpoint.remote_addr(), error = %e, "echo read failed");
                    return Flow::Closed;
                }
            }
        }
    }

    fn endpoint_mut(&mut self) -> &mut dyn Endpoint {
        self.endpoint.as_mut()
    }
}
