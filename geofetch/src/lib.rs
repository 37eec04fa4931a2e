//! GeoFetch - cached HTTP(S) retrieval for remote geodata
//!
//! This library fetches remote resources over HTTP(S), transparently
//! caches them on local disk according to HTTP freshness semantics, and
//! bounds outbound concurrency per remote host. It is the retrieval
//! engine for remote terrain/vector/OSM datasets; decoders and
//! generators sit on top and only ever ask for "these bytes or nothing".
//!
//! # High-Level API
//!
//! ```ignore
//! use geofetch::{FetchConfig, Http};
//!
//! let http = Http::new(FetchConfig::default())?;
//!
//! // Bytes, or None for a definitive 404 - cached either way.
//! let tile = http.get("https://tile.example.com/10/5/3.pbf").await?;
//!
//! // Mirror fallback: first URL that yields a parseable body wins.
//! let dataset = http
//!     .get_first(&mirror_urls, |bytes| parse_dataset(&bytes))
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod net;
pub mod time;

pub use cache::{CacheEntry, DiskStore, EntryStatus};
pub use config::FetchConfig;
pub use fetch::{FetchError, Http};
pub use net::{Host, HostManager};

/// Version of the GeoFetch library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
