//! Content-addressed cache key construction.

use sha2::{Digest, Sha256};

/// Compute the cache key for a URL.
///
/// Keys are the SHA-256 digest of the URL string, hex encoded. They are
/// deterministic, filesystem-safe, and fixed width, so a key can be used
/// directly as a cache filename.
///
/// # Example
///
/// ```
/// use geofetch::cache::cache_key;
///
/// let key = cache_key("https://tile.example.com/10/5/3.pbf");
/// assert_eq!(key.len(), 64);
/// ```
pub fn cache_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}
