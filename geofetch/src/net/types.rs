//! Shared network-layer types.

use crate::config::FetchConfig;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during transport operations.
///
/// Variants carry rendered reasons rather than error sources so that one
/// failure can be fanned out to every request queued behind it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// The URL cannot be turned into a host/request pair
    #[error("invalid request URL: {0}")]
    Url(String),

    /// TCP connect failed
    #[error("connect to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    /// TLS negotiation failed
    #[error("TLS handshake with {host} failed: {reason}")]
    Tls { host: String, reason: String },

    /// Writing the request onto the wire failed
    #[error("request write failed: {0}")]
    Write(String),

    /// Reading the response failed
    #[error("response read failed: {0}")]
    Read(String),

    /// A connect/read/write deadline elapsed
    #[error("{0} timed out")]
    Timeout(String),

    /// The peer sent something that is not valid HTTP/1.x
    #[error("malformed response: {0}")]
    Protocol(String),

    /// The owning manager went away before the request completed
    #[error("request dropped before completion")]
    Dropped,
}

/// Transport settings shared by every connection of the engine.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// User-Agent header injected into every request
    pub user_agent: String,
    /// Deadline applied independently to connect, read and write operations
    pub timeout: Duration,
}

impl From<&FetchConfig> for NetConfig {
    fn from(config: &FetchConfig) -> Self {
        Self {
            user_agent: config.user_agent().to_string(),
            timeout: config.timeout(),
        }
    }
}
