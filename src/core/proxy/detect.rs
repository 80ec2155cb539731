//! PROXY version discovery.
//!
//! Reads the first 16 bytes of a fronted connection — the v2 fixed header
//! size, and more than enough to recognize the v1 ASCII line — then upgrades
//! to the decoder for whichever variant the peer speaks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::core::connection::{Connection, Connector, Flow};
use crate::core::endpoint::{Endpoint, Fill};
use crate::core::proxy::v1::V1Connection;
use crate::core::proxy::v2::V2Connection;

const SEED_LEN: usize = 16;

pub(crate) struct DetectConnection {
    endpoint: Box<dyn Endpoint>,
    connector: Arc<Connector>,
    next_protocol: Option<String>,
    max_proxy_header: usize,
    buf: [u8; SEED_LEN],
    filled: usize,
}

impl DetectConnection {
    pub(crate) fn new(
        endpoint: Box<dyn Endpoint>,
        connector: Arc<Connector>,
        next_protocol: Option<String>,
        max_proxy_header: usize,
    ) -> Self {
        Self {
            endpoint,
            connector,
            next_protocol,
            max_proxy_header,
            buf: [0u8; SEED_LEN],
            filled: 0,
        }
    }
}

#[async_trait]
impl Connection for DetectConnection {
    async fn on_open(self: Box<Self>) -> Flow {
        Flow::FillInterested(self)
    }

    async fn on_fillable(mut self: Box<Self>) -> Flow {
        let peer = self.endpoint.remote_addr();

        while self.filled < SEED_LEN {
            match self.endpoint.fill(&mut self.buf[self.filled..]) {
                Ok(Fill::Data(n)) => self.filled += n,
                Ok(Fill::WouldBlock) => return Flow::FillInterested(self),
                Ok(Fill::Eof) => {
                    self.endpoint.shutdown_output().await;
                    return Flow::Closed;
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "preface read failed");
                    return Flow::Closed;
                }
            }
        }

        match self.buf[0] {
            b'P' => {
                match V1Connection::new(
                    self.endpoint,
                    self.connector,
                    self.next_protocol,
                    &self.buf,
                ) {
                    Ok(v1) => Flow::Upgraded(Box::new(v1)),
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "PROXY error");
                        Flow::Closed
                    }
                }
            }
            0x0D => {
                match V2Connection::new(
                    self.endpoint,
                    self.connector,
                    self.next_protocol,
                    self.max_proxy_header,
                    &self.buf,
                ) {
                    Ok(v2) => Flow::Upgraded(Box::new(v2)),
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "PROXY error");
                        Flow::Closed
                    }
                }
            }
            first => {
                warn!(peer = %peer, first_byte = first, "not PROXY protocol");
                Flow::Closed
            }
        }
    }

    fn endpoint_mut(&mut self) -> &mut dyn Endpoint {
        self.endpoint.as_mut()
    }
}
