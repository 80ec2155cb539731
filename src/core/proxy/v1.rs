//! PROXY v1 ASCII preface decoder.
//!
//! Continues from the 16 bytes the version detector already read, parsing
//! `PROXY <family> <src-ip> <dst-ip> <src-port> <dst-port>\r\n` one bounded
//! read at a time. Bytes past the trailing LF belong to the next protocol
//! and are never consumed from the endpoint; the rare remainder that arrives
//! in the same buffer as the LF is rewound in front of the upgraded
//! connection.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{ProxyError, Result};
use crate::core::connection::{Connection, Connector, Flow};
use crate::core::endpoint::{Endpoint, Fill, RewindEndpoint};
use crate::core::proxy::endpoint::ProxyEndpoint;

/// Shortest possible remainder of a preface line at each token index.
/// Capping each read at `SIZE[index] - accum.len()` keeps the decoder from
/// reading past the trailing LF of any canonically formatted line.
const SIZE: [usize; 7] = [29, 23, 21, 13, 5, 3, 1];

/// Hard cap on the whole line, CRLF included.
const MAX_LINE: usize = 108;

pub(crate) struct V1Connection {
    endpoint: Box<dyn Endpoint>,
    connector: Arc<Connector>,
    next_protocol: Option<String>,
    fields: [String; 6],
    accum: String,
    index: usize,
    total: usize,
    leftover: Vec<u8>,
}

impl V1Connection {
    /// Seeds the parser with the bytes the detector already consumed.
    pub(crate) fn new(
        endpoint: Box<dyn Endpoint>,
        connector: Arc<Connector>,
        next_protocol: Option<String>,
        seed: &[u8],
    ) -> Result<Self> {
        let mut conn = Self {
            endpoint,
            connector,
            next_protocol,
            fields: Default::default(),
            accum: String::new(),
            index: 0,
            total: seed.len(),
            leftover: Vec::new(),
        };
        conn.parse(seed)?;
        Ok(conn)
    }

    /// Advances the token state machine over `data`. Consumption stops at
    /// the terminating LF; anything after it is retained for the upgraded
    /// connection.
    fn parse(&mut self, data: &[u8]) -> Result<()> {
        let mut consumed = 0;
        for &b in data {
            consumed += 1;
            if self.index < 6 {
                match b {
                    b' ' | b'\r' => {
                        self.fields[self.index] = std::mem::take(&mut self.accum);
                        self.index += 1;
                        if b == b'\r' {
                            self.index = 6;
                        }
                    }
                    _ if b < 0x20 => {
                        return Err(ProxyError::MalformedPreface(format!(
                            "control byte 0x{b:02x} in v1 line"
                        )));
                    }
                    _ => self.accum.push(char::from(b)),
                }
            } else {
                if b != b'\n' {
                    return Err(ProxyError::MalformedPreface(format!(
                        "expected LF after CR, got 0x{b:02x}"
                    )));
                }
                self.index = 7;
                break;
            }
        }
        if self.index == 7 && consumed < data.len() {
            self.leftover.extend_from_slice(&data[consumed..]);
        }
        Ok(())
    }

    fn proxied_addresses(&self) -> Result<(SocketAddr, SocketAddr)> {
        let ip = |field: &str| -> Result<IpAddr> {
            field
                .parse()
                .map_err(|_| ProxyError::MalformedPreface(format!("bad v1 address {field:?}")))
        };
        let port = |field: &str| -> Result<u16> {
            field
                .parse()
                .map_err(|_| ProxyError::MalformedPreface(format!("bad v1 port {field:?}")))
        };
        Ok((
            SocketAddr::new(ip(&self.fields[2])?, port(&self.fields[4])?),
            SocketAddr::new(ip(&self.fields[3])?, port(&self.fields[5])?),
        ))
    }

    fn complete(self: Box<Self>) -> Flow {
        let peer = self.endpoint.remote_addr();

        if self.fields[0] != "PROXY" {
            warn!(peer = %peer, "not PROXY protocol");
            return Flow::Closed;
        }

        // If the family is UNKNOWN the preface addresses must be ignored and
        // the endpoint's own are reported instead.
        let (remote, local) = if self.fields[1].eq_ignore_ascii_case("UNKNOWN") {
            (self.endpoint.remote_addr(), self.endpoint.local_addr())
        } else {
            match self.proxied_addresses() {
                Ok(addresses) => addresses,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "PROXY error");
                    return Flow::Closed;
                }
            }
        };

        let V1Connection {
            endpoint,
            connector,
            next_protocol,
            leftover,
            ..
        } = *self;

        let Some(factory) = next_protocol
            .as_deref()
            .and_then(|name| connector.connection_factory(name))
        else {
            warn!(
                peer = %peer,
                error = %ProxyError::NoNextProtocol(next_protocol),
                "PROXY error"
            );
            return Flow::Closed;
        };

        debug!(peer = %peer, remote = %remote, local = %local, "v1 preface decoded");

        let endpoint: Box<dyn Endpoint> = if leftover.is_empty() {
            endpoint
        } else {
            Box::new(RewindEndpoint::new(endpoint, leftover))
        };
        let wrapped = ProxyEndpoint::new(endpoint, remote, local);
        let conn = factory.new_connection(&connector, Box::new(wrapped));
        Flow::Upgraded(conn)
    }
}

#[async_trait]
impl Connection for V1Connection {
    async fn on_open(self: Box<Self>) -> Flow {
        if self.index == 7 {
            self.complete()
        } else {
            Flow::FillInterested(self)
        }
    }

    async fn on_fillable(mut self: Box<Self>) -> Flow {
        let peer = self.endpoint.remote_addr();
        let mut buf = [0u8; 32];

        while self.index < 7 {
            // A buffer that cannot run past the trailing CRLF, since bytes
            // read here are gone for the next connection.
            let size = SIZE[self.index]
                .saturating_sub(self.accum.len())
                .clamp(1, buf.len());

            match self.endpoint.fill(&mut buf[..size]) {
                Ok(Fill::Data(n)) => {
                    self.total += n;
                    if self.total > MAX_LINE {
                        warn!(
                            peer = %peer,
                            error = %ProxyError::PrefaceTooLong {
                                length: self.total,
                                limit: MAX_LINE,
                            },
                            "PROXY error"
                        );
                        return Flow::Closed;
                    }
                    if let Err(e) = self.parse(&buf[..n]) {
                        warn!(peer = %peer, error = %e, "PROXY error");
                        return Flow::Closed;
                    }
                }
                Ok(Fill::WouldBlock) => return Flow::FillInterested(self),
                Ok(Fill::Eof) => {
                    debug!(peer = %peer, "EOF before v1 preface complete");
                    self.endpoint.shutdown_output().await;
                    return Flow::Closed;
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "PROXY error");
                    return Flow::Closed;
                }
            }
        }

        self.complete()
    }

    fn endpoint_mut(&mut self) -> &mut dyn Endpoint {
        self.endpoint.as_mut()
    }
}
