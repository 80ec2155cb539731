//! Test utilities.
//!
//! A scripted in-memory endpoint and a recording next-protocol connection,
//! shared by unit and integration tests so decoder behavior can be asserted
//! under any chunking of the input.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::connection::{Connection, ConnectionFactory, Connector, Flow, drive};
use crate::core::endpoint::{Endpoint, Fill};
use crate::core::proxy::TLS_VERSION;

/// One scripted readable event.
pub enum Step {
    /// Bytes the kernel has buffered; a `fill` takes at most the caller's
    /// buffer worth and the rest stays queued.
    Data(Vec<u8>),
    /// Report would-block once.
    WouldBlock,
    /// Peer closed its write side; persists for every later `fill`.
    Eof,
}

#[derive(Default)]
struct MockState {
    written: Vec<u8>,
    output_shutdown: bool,
    bytes_filled: usize,
}

/// Endpoint fed from a fixed script of readable events.
pub struct MockEndpoint {
    steps: VecDeque<Step>,
    state: Arc<Mutex<MockState>>,
    remote: SocketAddr,
    local: SocketAddr,
}

/// Observer half of a [`MockEndpoint`], usable after the endpoint has been
/// moved into a connection.
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    remote: SocketAddr,
    local: SocketAddr,
}

impl MockEndpoint {
    /// Builds an endpoint that plays back `steps`, plus its observer.
    #[must_use]
    pub fn script(steps: Vec<Step>) -> (Self, MockHandle) {
        let remote = "198.51.100.7:52000".parse().expect("mock remote addr");
        let local = "198.51.100.1:8080".parse().expect("mock local addr");
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                steps: steps.into(),
                state: state.clone(),
                remote,
                local,
            },
            MockHandle {
                state,
                remote,
                local,
            },
        )
    }
}

impl MockHandle {
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().expect("mock state").written.clone()
    }

    #[must_use]
    pub fn output_shutdown(&self) -> bool {
        self.state.lock().expect("mock state").output_shutdown
    }

    #[must_use]
    pub fn bytes_filled(&self) -> usize {
        self.state.lock().expect("mock state").bytes_filled
    }

    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Fill> {
        match self.steps.front_mut() {
            Some(Step::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                bytes.drain(..n);
                if bytes.is_empty() {
                    self.steps.pop_front();
                }
                self.state.lock().expect("mock state").bytes_filled += n;
                Ok(Fill::Data(n))
            }
            Some(Step::WouldBlock) => {
                self.steps.pop_front();
                Ok(Fill::WouldBlock)
            }
            Some(Step::Eof) => Ok(Fill::Eof),
            None => Ok(Fill::WouldBlock),
        }
    }

    async fn fill_interested(&mut self) -> io::Result<()> {
        if self.steps.is_empty() {
            // Nothing further scripted: behave like an idle timeout.
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        Ok(())
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.state
            .lock()
            .expect("mock state")
            .written
            .extend_from_slice(buf);
        Ok(())
    }

    async fn shutdown_output(&mut self) {
        self.state.lock().expect("mock state").output_shutdown = true;
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

/// What a recording next-protocol connection observed.
#[derive(Default)]
pub struct CaptureState {
    /// Whether the upgrade reached the next protocol at all.
    pub opened: bool,
    /// Every byte the next protocol read after the upgrade.
    pub filled: Vec<u8>,
    /// Remote address the (possibly wrapped) endpoint reported.
    pub remote: Option<SocketAddr>,
    /// Local address the (possibly wrapped) endpoint reported.
    pub local: Option<SocketAddr>,
    /// `TLS_VERSION` attribute, when the preface carried one.
    pub tls_version: Option<String>,
}

/// Next-protocol factory whose connections record what they observe.
pub struct CaptureFactory {
    name: String,
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::named("capture")
    }

    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(CaptureState::default())),
        }
    }

    #[must_use]
    pub fn state(&self) -> Arc<Mutex<CaptureState>> {
        self.state.clone()
    }
}

impl Default for CaptureFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory for CaptureFactory {
    fn protocol(&self) -> &str {
        &self.name
    }

    fn new_connection(
        &self,
        _connector: &Arc<Connector>,
        endpoint: Box<dyn Endpoint>,
    ) -> Box<dyn Connection> {
        Box::new(CaptureConnection {
            endpoint,
            state: self.state.clone(),
        })
    }
}

struct CaptureConnection {
    endpoint: Box<dyn Endpoint>,
    state: Arc<Mutex<CaptureState>>,
}

#[async_trait]
impl Connection for CaptureConnection {
    async fn on_open(self: Box<Self>) -> Flow {
        {
            let mut state = self.state.lock().expect("capture state");
            state.opened = true;
            state.remote = Some(self.endpoint.remote_addr());
            state.local = Some(self.endpoint.local_addr());
            state.tls_version = self.endpoint.attribute(TLS_VERSION).map(str::to_string);
        }
        Flow::FillInterested(self)
    }

    async fn on_fillable(mut self: Box<Self>) -> Flow {
        let mut buf = [0u8; 4096];
        loop {
            match self.endpoint.fill(&mut buf) {
                Ok(Fill::Data(n)) => {
                    self.state
                        .lock()
                        .expect("capture state")
                        .filled
                        .extend_from_slice(&buf[..n]);
                }
                Ok(Fill::WouldBlock) => return Flow::FillInterested(self),
                Ok(Fill::Eof) => {
                    self.endpoint.shutdown_output().await;
                    return Flow::Closed;
                }
                Err(_) => return Flow::Closed,
            }
        }
    }

    fn endpoint_mut(&mut self) -> &mut dyn Endpoint {
        self.endpoint.as_mut()
    }
}

/// Connector holding a single capture factory registered as `"capture"`.
#[must_use]
pub fn capture_connector() -> (Arc<Connector>, Arc<Mutex<CaptureState>>) {
    let factory = CaptureFactory::new();
    let state = factory.state();
    (Connector::new(vec![Arc::new(factory)]), state)
}

/// Drives a connection to completion against its scripted endpoint.
pub async fn run(conn: Box<dyn Connection>) {
    drive(conn).await;
}
