//! Front TCP listener.
//!
//! Accepts connections, applies socket options, and hands each one to the
//! connector's head protocol under a concurrency limit.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::core::connection::{Connector, serve};
use crate::core::endpoint::TcpEndpoint;

fn configure_tcp_stream(stream: &TcpStream) {
    let sock = socket2::SockRef::from(&stream);

    let _ = stream.set_nodelay(true);

    let mut ka = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));

    #[cfg(not(target_os = "openbsd"))]
    {
        ka = ka.with_retries(3);
    }

    let _ = sock.set_tcp_keepalive(&ka);

    #[cfg(target_os = "linux")]
    {
        let _ = sock.set_tcp_user_timeout(Some(Duration::from_millis(10000)));
    }
}

/// Runs the accept loop.
///
/// # Panics
///
/// Panics if the TCP listener fails to bind to the configured address
/// (fatal startup error).
pub async fn run_listener(config: Arc<Config>, connector: Arc<Connector>) {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .unwrap_or_else(|e| {
            panic!(
                "FATAL: Failed to bind listener to {}: {}",
                config.listen_addr, e
            )
        });

    info!(
        listen_addr = %config.listen_addr,
        protocols = ?connector.protocols(),
        "listener started"
    );

    let connection_limit = Arc::new(Semaphore::new(config.concurrency_limit));

    loop {
        let Ok(permit) = connection_limit.clone().acquire_owned().await else {
            break;
        };

        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                configure_tcp_stream(&stream);
                let connector = connector.clone();
                let idle_timeout = config.idle_timeout();
                tokio::spawn(async move {
                    let _permit = permit;
                    let endpoint = match TcpEndpoint::new(stream, idle_timeout) {
                        Ok(endpoint) => endpoint,
                        Err(e) => {
                            debug!(peer = %peer_addr, error = %e, "endpoint setup failed");
                            return;
                        }
                    };
                    serve(connector, Box::new(endpoint)).await;
                });
            }
            Err(e) => {
                error!(error = %e, "accept error");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
