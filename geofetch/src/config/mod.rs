//! Fetch engine configuration.
//!
//! Groups all tunables for the retrieval engine, providing sensible
//! defaults while allowing customization through a builder-style API.
//!
//! # Example
//!
//! ```
//! use geofetch::config::FetchConfig;
//!
//! // Using defaults
//! let config = FetchConfig::default();
//! assert_eq!(config.timeout_secs(), 20);
//! assert_eq!(config.cache_ttl_minutes(), 1440);
//!
//! // Custom configuration
//! let config = FetchConfig::new()
//!     .with_timeout_secs(60)
//!     .with_cache_ttl_minutes(60)
//!     .with_max_concurrent_per_host(16)
//!     .with_host_overrides(&["32: cloud.example.com".to_string()]);
//! assert_eq!(config.concurrency_for("cloud.example.com"), 32);
//! assert_eq!(config.concurrency_for("other.example.com"), 16);
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default timeout applied to connect, read and write operations (seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Default fallback cache TTL in minutes, used when a response carries no
/// usable expiry information (one day).
pub const DEFAULT_CACHE_TTL_MINUTES: u32 = 1440;

/// Default cap on simultaneous in-flight requests per remote host.
pub const DEFAULT_MAX_CONCURRENT_PER_HOST: usize = 8;

/// Default interval between expired-entry pruning sweeps (one hour).
pub const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 3600;

/// Configuration for the fetch engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// User-Agent header injected into every outbound request
    user_agent: String,
    /// Fallback cache TTL in minutes
    cache_ttl_minutes: u32,
    /// Connect/read/write timeout in seconds
    timeout_secs: u64,
    /// Whether responses are persisted to disk at all
    caching_enabled: bool,
    /// Default per-host concurrency cap
    max_concurrent_per_host: usize,
    /// Per-host concurrency overrides, keyed by hostname
    host_overrides: HashMap<String, usize>,
    /// Interval between cache pruning sweeps
    prune_interval_secs: u64,
    /// Cache directory override; `None` uses the process-wide root
    cache_dir: Option<PathBuf>,
}

impl FetchConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the User-Agent string sent with every request.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the fallback cache TTL in minutes.
    ///
    /// Applied when a response carries no `Expires` header or
    /// `stale-while-revalidate` directive. Default: 1440 (one day).
    pub fn with_cache_ttl_minutes(mut self, minutes: u32) -> Self {
        self.cache_ttl_minutes = minutes;
        self
    }

    /// Set the connect/read/write timeout in seconds. Default: 20.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Enable or disable disk caching entirely. Default: enabled.
    pub fn with_caching_enabled(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    /// Set the default per-host concurrency cap. Default: 8.
    pub fn with_max_concurrent_per_host(mut self, max: usize) -> Self {
        self.max_concurrent_per_host = max.max(1);
        self
    }

    /// Apply per-host concurrency override entries of the form
    /// `"N: hostname"`.
    ///
    /// Malformed entries are logged and skipped; they never fail startup.
    pub fn with_host_overrides(mut self, entries: &[String]) -> Self {
        for entry in entries {
            match parse_host_override(entry) {
                Some((host, max)) => {
                    self.host_overrides.insert(host, max);
                }
                None => {
                    warn!(entry = %entry, "Ignoring malformed host concurrency override");
                }
            }
        }
        self
    }

    /// Set the interval between cache pruning sweeps. Default: one hour.
    pub fn with_prune_interval_secs(mut self, secs: u64) -> Self {
        self.prune_interval_secs = secs.max(1);
        self
    }

    /// Use an explicit cache directory instead of the process-wide root.
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    /// Get the User-Agent string.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Get the fallback cache TTL in minutes.
    pub fn cache_ttl_minutes(&self) -> u32 {
        self.cache_ttl_minutes
    }

    /// Get the fallback cache TTL in milliseconds, as used by freshness
    /// arithmetic.
    pub fn cache_ttl_millis(&self) -> i64 {
        i64::from(self.cache_ttl_minutes) * 60_000
    }

    /// Get the connect/read/write timeout in seconds.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Get the connect/read/write timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether disk caching is enabled.
    pub fn caching_enabled(&self) -> bool {
        self.caching_enabled
    }

    /// Get the default per-host concurrency cap.
    pub fn max_concurrent_per_host(&self) -> usize {
        self.max_concurrent_per_host
    }

    /// Resolve the concurrency cap for a specific hostname, honouring
    /// overrides.
    pub fn concurrency_for(&self, hostname: &str) -> usize {
        self.host_overrides
            .get(hostname)
            .copied()
            .unwrap_or(self.max_concurrent_per_host)
    }

    /// Get the configured per-host overrides.
    pub fn host_overrides(&self) -> &HashMap<String, usize> {
        &self.host_overrides
    }

    /// Get the prune sweep interval.
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    /// Get the cache directory override, if any.
    pub fn cache_dir(&self) -> Option<&PathBuf> {
        self.cache_dir.as_ref()
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("GeoFetch/{}", env!("CARGO_PKG_VERSION")),
            cache_ttl_minutes: DEFAULT_CACHE_TTL_MINUTES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            caching_enabled: true,
            max_concurrent_per_host: DEFAULT_MAX_CONCURRENT_PER_HOST,
            host_overrides: HashMap::new(),
            prune_interval_secs: DEFAULT_PRUNE_INTERVAL_SECS,
            cache_dir: None,
        }
    }
}

/// Parse a single `"N: hostname"` override entry.
///
/// Returns `None` when the count is missing, zero, or unparsable, or when
/// the hostname is empty.
fn parse_host_override(entry: &str) -> Option<(String, usize)> {
    let (count, host) = entry.split_once(':')?;
    let count: usize = count.trim().parse().ok()?;
    let host = host.trim();
    if count == 0 || host.is_empty() {
        return None;
    }
    Some((host.to_string(), count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FetchConfig::default();
        assert_eq!(config.timeout_secs(), DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.cache_ttl_minutes(), DEFAULT_CACHE_TTL_MINUTES);
        assert_eq!(
            config.max_concurrent_per_host(),
            DEFAULT_MAX_CONCURRENT_PER_HOST
        );
        assert!(config.caching_enabled());
        assert!(config.host_overrides().is_empty());
        assert!(config.cache_dir().is_none());
        assert!(config.user_agent().starts_with("GeoFetch/"));
    }

    #[test]
    fn test_new_equals_default() {
        assert_eq!(FetchConfig::new(), FetchConfig::default());
    }

    #[test]
    fn test_builder_chain() {
        let config = FetchConfig::new()
            .with_user_agent("TestAgent/1.0")
            .with_timeout_secs(45)
            .with_cache_ttl_minutes(10)
            .with_caching_enabled(false)
            .with_max_concurrent_per_host(4);

        assert_eq!(config.user_agent(), "TestAgent/1.0");
        assert_eq!(config.timeout_secs(), 45);
        assert_eq!(config.cache_ttl_minutes(), 10);
        assert_eq!(config.cache_ttl_millis(), 600_000);
        assert!(!config.caching_enabled());
        assert_eq!(config.max_concurrent_per_host(), 4);
    }

    #[test]
    fn test_zero_concurrency_clamped_to_one() {
        let config = FetchConfig::new().with_max_concurrent_per_host(0);
        assert_eq!(config.max_concurrent_per_host(), 1);
    }

    #[test]
    fn test_parse_host_override_valid() {
        assert_eq!(
            parse_host_override("12: tile.example.com"),
            Some(("tile.example.com".to_string(), 12))
        );
        assert_eq!(
            parse_host_override("3:other.example.com"),
            Some(("other.example.com".to_string(), 3))
        );
    }

    #[test]
    fn test_parse_host_override_malformed() {
        assert_eq!(parse_host_override("tile.example.com"), None);
        assert_eq!(parse_host_override(": tile.example.com"), None);
        assert_eq!(parse_host_override("many: tile.example.com"), None);
        assert_eq!(parse_host_override("0: tile.example.com"), None);
        assert_eq!(parse_host_override("8:"), None);
    }

    #[test]
    fn test_host_overrides_applied() {
        let entries = vec![
            "32: fast.example.com".to_string(),
            "bogus entry".to_string(),
            "2: slow.example.com".to_string(),
        ];
        let config = FetchConfig::new().with_host_overrides(&entries);

        assert_eq!(config.concurrency_for("fast.example.com"), 32);
        assert_eq!(config.concurrency_for("slow.example.com"), 2);
        assert_eq!(
            config.concurrency_for("unknown.example.com"),
            DEFAULT_MAX_CONCURRENT_PER_HOST
        );
    }
}
