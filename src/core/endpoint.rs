//! Non-blocking byte endpoints.
//!
//! An endpoint is the byte source/sink a connection is bound to. Reads are
//! explicit and never block: `fill` copies whatever the kernel has buffered,
//! and a connection that sees [`Fill::WouldBlock`] must return control and
//! wait for the next readable event via `fill_interested`.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Outcome of a single non-blocking `fill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// `n` bytes were copied into the buffer.
    Data(usize),
    /// No bytes are currently available; re-arm and wait.
    WouldBlock,
    /// The peer closed its write side.
    Eof,
}

/// A bidirectional, non-blocking byte channel with readiness notification.
///
/// Implementations must deliver bytes in order and must not consume more
/// from the underlying transport than a `fill` call copies out, so that a
/// connection handed this endpoint after an upgrade sees every byte the
/// previous connection did not take.
#[async_trait]
pub trait Endpoint: Send {
    /// Copies available bytes into `buf` without blocking.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Fill>;

    /// Waits for the next readable event (one-shot registration).
    async fn fill_interested(&mut self) -> io::Result<()>;

    /// Writes the whole buffer to the peer.
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Shuts down the write side; the read side stays usable.
    async fn shutdown_output(&mut self);

    /// Reported local socket address.
    fn local_addr(&self) -> SocketAddr;

    /// Reported remote socket address.
    fn remote_addr(&self) -> SocketAddr;

    /// Named attribute attached to this endpoint, if any.
    fn attribute(&self, _name: &str) -> Option<&str> {
        None
    }
}

/// [`Endpoint`] over a tokio TCP stream.
///
/// Readiness waits are bounded by the idle timeout when one is set; a
/// connection that stays silent past it is closed with a timeout error.
pub struct TcpEndpoint {
    stream: TcpStream,
    local: SocketAddr,
    remote: SocketAddr,
    idle_timeout: Option<Duration>,
}

impl TcpEndpoint {
    pub fn new(stream: TcpStream, idle_timeout: Option<Duration>) -> io::Result<Self> {
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        Ok(Self {
            stream,
            local,
            remote,
            idle_timeout,
        })
    }
}

#[async_trait]
impl Endpoint for TcpEndpoint {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Fill> {
        match self.stream.try_read(buf) {
            Ok(0) => Ok(Fill::Eof),
            Ok(n) => Ok(Fill::Data(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Fill::WouldBlock),
            Err(e) => Err(e),
        }
    }

    async fn fill_interested(&mut self) -> io::Result<()> {
        match self.idle_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.stream.readable())
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))?,
            None => self.stream.readable().await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    async fn shutdown_output(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

/// An [`Endpoint`] that replays already-read bytes before delegating.
///
/// Used when a decoder's final read unavoidably captured bytes belonging to
/// the next protocol: the remainder is rewound so the upgraded connection
/// still observes the complete stream.
pub struct RewindEndpoint {
    inner: Box<dyn Endpoint>,
    prefix: Vec<u8>,
    pos: usize,
}

impl RewindEndpoint {
    #[must_use]
    pub fn new(inner: Box<dyn Endpoint>, prefix: Vec<u8>) -> Self {
        Self {
            inner,
            prefix,
            pos: 0,
        }
    }
}

#[async_trait]
impl Endpoint for RewindEndpoint {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Fill> {
        if self.pos < self.prefix.len() {
            let n = (self.prefix.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.prefix[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(Fill::Data(n));
        }
        self.inner.fill(buf)
    }

    async fn fill_interested(&mut self) -> io::Result<()> {
        if self.pos < self.prefix.len() {
            return Ok(());
        }
        self.inner.fill_interested().await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf).await
    }

    async fn shutdown_output(&mut self) {
        self.inner.shutdown_output().await;
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr()
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.inner.attribute(name)
    }
}
