//! Error types and result aliases.
//!
//! Defines the core `ProxyError` enumeration and common `Result` type.

use thiserror::Error;

/// Fatal decode conditions for a fronted connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Bytes that violate the v1 grammar or the v2 header layout.
    #[error("malformed preface: {0}")]
    MalformedPreface(String),

    /// v1 line or v2 payload larger than its cap.
    #[error("preface too long: {length} bytes exceeds {limit}")]
    PrefaceTooLong { length: usize, limit: usize },

    /// Non-LOCAL v2 header with an address family or transport that
    /// cannot be proxied.
    #[error("unsupported v2 mode 0x{ver_cmd:02x},0x{fam_trans:02x}")]
    UnsupportedMode { ver_cmd: u8, fam_trans: u8 },

    /// The configured or discovered next protocol is not registered.
    #[error("no next protocol {0:?}")]
    NoNextProtocol(Option<String>),

    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for `ProxyError`.
pub type Result<T> = std::result::Result<T, ProxyError>;
