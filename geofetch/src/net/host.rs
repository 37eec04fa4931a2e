//! Host identity for connection pooling.

use crate::net::types::NetError;
use std::fmt;
use url::Url;

/// The identity (scheme, host, port) that groups requests into one
/// connection pool.
///
/// Equality and hashing drive pool lookup: two URLs that agree on all
/// three fields share a manager, everything else gets its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    /// Whether connections are TLS-wrapped (`https`)
    pub tls: bool,
    /// Remote hostname as it appeared in the URL
    pub hostname: String,
    /// Remote port, with scheme defaults applied
    pub port: u16,
}

impl Host {
    /// Extract the pooling identity from an absolute `http`/`https` URL.
    pub fn from_url(url: &Url) -> Result<Self, NetError> {
        let tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(NetError::Url(format!("unsupported scheme \"{other}\""))),
        };
        let hostname = url
            .host_str()
            .ok_or_else(|| NetError::Url(format!("no host in \"{url}\"")))?
            .to_string();
        let port = url.port().unwrap_or(if tls { 443 } else { 80 });

        Ok(Self {
            tls,
            hostname,
            port,
        })
    }

    /// The value for the `Host` request header: hostname, plus the port
    /// when it differs from the scheme default.
    pub fn authority(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.hostname.clone()
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        write!(f, "{}://{}:{}", scheme, self.hostname, self.port)
    }
}
