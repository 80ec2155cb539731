//! PROXY v2 binary preface decoder.
//!
//! The 16 seed bytes from the version detector are exactly the fixed v2
//! header; everything it declares beyond that — address block plus optional
//! TLVs — is read into an exact-size buffer so not one byte of the next
//! protocol is touched.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{ProxyError, Result};
use crate::core::connection::{Connection, Connector, Flow};
use crate::core::endpoint::{Endpoint, Fill};
use crate::core::proxy::endpoint::{ProxyEndpoint, TLS_VERSION};

const MAGIC: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

const PP2_TYPE_SSL: u8 = 0x20;
const PP2_CLIENT_SSL: u8 = 0x01;
const PP2_SUBTYPE_SSL_VERSION: u8 = 0x21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Unspec,
    Inet,
    Inet6,
    Unix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Unspec,
    Stream,
    Dgram,
}

pub(crate) struct V2Connection {
    endpoint: Box<dyn Endpoint>,
    connector: Arc<Connector>,
    next_protocol: Option<String>,
    local: bool,
    family: Family,
    payload: Vec<u8>,
    filled: usize,
}

impl V2Connection {
    /// Validates the fixed header and allocates the declared payload.
    pub(crate) fn new(
        endpoint: Box<dyn Endpoint>,
        connector: Arc<Connector>,
        next_protocol: Option<String>,
        max_proxy_header: usize,
        seed: &[u8; 16],
    ) -> Result<Self> {
        if seed[..12] != MAGIC {
            return Err(ProxyError::MalformedPreface("bad v2 signature".to_string()));
        }

        let ver_cmd = seed[12];
        if ver_cmd & 0xF0 != 0x20 {
            return Err(ProxyError::MalformedPreface(format!(
                "bad v2 version 0x{ver_cmd:02x}"
            )));
        }
        let local = match ver_cmd & 0x0F {
            0x00 => true,
            0x01 => false,
            cmd => {
                return Err(ProxyError::MalformedPreface(format!(
                    "bad v2 command 0x{cmd:x}"
                )));
            }
        };

        let fam_trans = seed[13];
        let family = match fam_trans >> 4 {
            0x0 => Family::Unspec,
            0x1 => Family::Inet,
            0x2 => Family::Inet6,
            0x3 => Family::Unix,
            fam => {
                return Err(ProxyError::MalformedPreface(format!(
                    "bad v2 family 0x{fam:x}"
                )));
            }
        };
        let transport = match fam_trans & 0x0F {
            0x0 => Transport::Unspec,
            0x1 => Transport::Stream,
            0x2 => Transport::Dgram,
            t => {
                return Err(ProxyError::MalformedPreface(format!(
                    "bad v2 transport 0x{t:x}"
                )));
            }
        };

        // Unsigned, 0..=65535.
        let declared_len = usize::from(u16::from_be_bytes([seed[14], seed[15]]));

        if !local
            && (family == Family::Unspec
                || family == Family::Unix
                || transport != Transport::Stream)
        {
            return Err(ProxyError::UnsupportedMode { ver_cmd, fam_trans });
        }

        if declared_len > max_proxy_header {
            return Err(ProxyError::PrefaceTooLong {
                length: declared_len,
                limit: max_proxy_header,
            });
        }

        Ok(Self {
            endpoint,
            connector,
            next_protocol,
            local,
            family,
            payload: vec![0u8; declared_len],
            filled: 0,
        })
    }

    /// Looks up the next protocol, wraps the endpoint unless the command was
    /// LOCAL, and upgrades.
    fn next(self: Box<Self>) -> Flow {
        let peer = self.endpoint.remote_addr();

        let V2Connection {
            endpoint,
            connector,
            next_protocol,
            local,
            family,
            payload,
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

        let endpoint: Box<dyn Endpoint> = if local {
            // A LOCAL header carries no real client; hand the endpoint over
            // untouched.
            endpoint
        } else {
            match proxied_addresses(family, &payload) {
                Ok((remote, local_addr, tlv_offset)) => {
                    debug!(peer = %peer, remote = %remote, local = %local_addr, "v2 preface decoded");
                    let mut wrapped = ProxyEndpoint::new(endpoint, remote, local_addr);
                    if let Err(e) = walk_tlvs(&payload[tlv_offset..], &mut wrapped) {
                        // Optional trailers never invalidate a decoded preface.
                        warn!(peer = %peer, error = %e, "ignoring malformed v2 TLVs");
                    }
                    Box::new(wrapped)
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "ignoring unparsable v2 address block");
                    endpoint
                }
            }
        };

        let conn = factory.new_connection(&connector, endpoint);
        Flow::Upgraded(conn)
    }
}

/// Extracts source/destination addresses from the front of the payload.
/// Returns the offset where TLVs begin.
fn proxied_addresses(family: Family, payload: &[u8]) -> Result<(SocketAddr, SocketAddr, usize)> {
    match family {
        Family::Inet => {
            if payload.len() < 12 {
                return Err(ProxyError::MalformedPreface(format!(
                    "v2 INET payload too short: {}",
                    payload.len()
                )));
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&payload[0..4]);
            let src = IpAddr::V4(Ipv4Addr::from(octets));
            octets.copy_from_slice(&payload[4..8]);
            let dst = IpAddr::V4(Ipv4Addr::from(octets));
            let src_port = u16::from_be_bytes([payload[8], payload[9]]);
            let dst_port = u16::from_be_bytes([payload[10], payload[11]]);
            Ok((
                SocketAddr::new(src, src_port),
                SocketAddr::new(dst, dst_port),
                12,
            ))
        }
        Family::Inet6 => {
            if payload.len() < 36 {
                return Err(ProxyError::MalformedPreface(format!(
                    "v2 INET6 payload too short: {}",
                    payload.len()
                )));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&payload[0..16]);
            let src = IpAddr::V6(Ipv6Addr::from(octets));
            octets.copy_from_slice(&payload[16..32]);
            let dst = IpAddr::V6(Ipv6Addr::from(octets));
            let src_port = u16::from_be_bytes([payload[32], payload[33]]);
            let dst_port = u16::from_be_bytes([payload[34], payload[35]]);
            Ok((
                SocketAddr::new(src, src_port),
                SocketAddr::new(dst, dst_port),
                36,
            ))
        }
        // Guarded at construction for non-LOCAL commands.
        Family::Unspec | Family::Unix => Err(ProxyError::MalformedPreface(format!(
            "no addresses for family {family:?}"
        ))),
    }
}

/// Walks the optional TLV trailer, recording the TLS version from an SSL
/// TLV. Unknown types are recognized and skipped: ALPN (0x01), AUTHORITY
/// (0x02), CRC32C (0x03), NOOP (0x04), NETNS (0x30) and anything else.
fn walk_tlvs(buf: &[u8], endpoint: &mut ProxyEndpoint) -> Result<()> {
    let mut i = 0;
    while i < buf.len() {
        if i + 3 > buf.len() {
            return Err(ProxyError::MalformedPreface(
                "truncated TLV header".to_string(),
            ));
        }
        let tlv_type = buf[i];
        let tlv_len = usize::from(u16::from_be_bytes([buf[i + 1], buf[i + 2]]));
        i += 3;
        if i + tlv_len > buf.len() {
            return Err(ProxyError::MalformedPreface(format!(
                "TLV 0x{tlv_type:02x} overruns payload"
            )));
        }
        let value = &buf[i..i + tlv_len];
        i += tlv_len;

        if tlv_type == PP2_TYPE_SSL {
            parse_ssl_tlv(value, endpoint)?;
        }
    }
    Ok(())
}

/// SSL TLV layout: `client:u8, verify:u32`, then sub-TLVs. Only the
/// SSL_VERSION sub-type (0x21) is extracted; CN, cipher and key/sig
/// algorithm sub-types are recognized and skipped.
fn parse_ssl_tlv(value: &[u8], endpoint: &mut ProxyEndpoint) -> Result<()> {
    let Some(&client) = value.first() else {
        return Err(ProxyError::MalformedPreface("empty SSL TLV".to_string()));
    };
    if client != PP2_CLIENT_SSL {
        return Ok(());
    }

    let mut i = 5;
    while i < value.len() {
        if i + 3 > value.len() {
            return Err(ProxyError::MalformedPreface(
                "truncated SSL sub-TLV".to_string(),
            ));
        }
        let sub_type = value[i];
        let sub_len = usize::from(u16::from_be_bytes([value[i + 1], value[i + 2]]));
        i += 3;
        if i + sub_len > value.len() {
            return Err(ProxyError::MalformedPreface(format!(
                "SSL sub-TLV 0x{sub_type:02x} overruns value"
            )));
        }
        let sub_value = &value[i..i + sub_len];
        i += sub_len;

        if sub_type == PP2_SUBTYPE_SSL_VERSION {
            // US-ASCII; stray high-bit bytes degrade the value, they do not
            // stop the walk.
            let version = String::from_utf8_lossy(sub_value);
            endpoint.set_attribute(TLS_VERSION, version);
        }
    }
    Ok(())
}

#[async_trait]
impl Connection for V2Connection {
    async fn on_open(self: Box<Self>) -> Flow {
        if self.filled == self.payload.len() {
            self.next()
        } else {
            Flow::FillInterested(self)
        }
    }

    async fn on_fillable(mut self: Box<Self>) -> Flow {
        let peer = self.endpoint.remote_addr();

        while self.filled < self.payload.len() {
            let filled = self.filled;
            match self.endpoint.fill(&mut self.payload[filled..]) {
                Ok(Fill::Data(n)) => self.filled += n,
                Ok(Fill::WouldBlock) => return Flow::FillInterested(self),
                Ok(Fill::Eof) => {
                    debug!(peer = %peer, "EOF before v2 payload complete");
                    self.endpoint.shutdown_output().await;
                    return Flow::Closed;
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "PROXY error");
                    return Flow::Closed;
                }
            }
        }

        self.next()
    }

    fn endpoint_mut(&mut self) -> &mut dyn Endpoint {
        self.endpoint.as_mut()
    }
}
