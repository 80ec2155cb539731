//! Configuration settings.
//!
//! Defines the main `Config` struct and environment variable loading logic.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_u16_or(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn get_env_u64_or(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn get_env_usize_or(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on (external, receives PROXY prefaces).
    pub listen_addr: SocketAddr,
    /// Explicit next-protocol name; when unset the protocol listed after
    /// "proxy" on the connector is used.
    pub next_protocol: Option<String>,
    /// Maximum v2 payload size in bytes.
    pub max_proxy_header: u16,
    /// Seconds a connection may sit idle waiting for readability; 0 disables.
    pub idle_timeout_secs: u64,
    /// Maximum number of in-flight connections.
    pub concurrency_limit: usize,
    /// Logging format: "json" or "pretty".
    pub log_format: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Panics
    ///
    /// Panics if `LISTEN_ADDR` is set but not a valid socket address.
    #[must_use]
    pub fn from_env() -> Arc<Self> {
        let listen_addr = get_env_or("LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .expect("LISTEN_ADDR must be a valid socket address");
        let next_protocol = env::var("NEXT_PROTOCOL").ok().filter(|s| !s.is_empty());

        Arc::new(Self {
            listen_addr,
            next_protocol,
            max_proxy_header: get_env_u16_or("MAX_PROXY_HEADER", 1024),
            idle_timeout_secs: get_env_u64_or("IDLE_TIMEOUT_SECS", 30),
            concurrency_limit: get_env_usize_or("CONCURRENCY_LIMIT", 1024),
            log_format: get_env_or("LOG_FORMAT", "json"),
        })
    }

    /// Idle timeout as a duration, or `None` when disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}
