//! Transport layer: host identity, per-host connection managers, and the
//! HTTP/1.1 wire codec.

mod connection;
pub mod host;
pub mod manager;
pub mod request;
pub mod response;
pub mod types;

pub use host::Host;
pub use manager::HostManager;
pub use request::{request_target, Request};
pub use response::{Headers, Response};
pub use types::{NetConfig, NetError};
