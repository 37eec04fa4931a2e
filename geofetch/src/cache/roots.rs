//! Process-wide root directories.
//!
//! The cache root and the auxiliary config root may each be configured at
//! most once per process, before first use. Configuring a root twice is a
//! programmer error and panics; a root that is never configured resolves
//! to a default under the platform cache/config directory on first use.

use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::info;

static CACHE_ROOT: OnceLock<PathBuf> = OnceLock::new();
static CONFIG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Configure the cache root for this process.
///
/// # Panics
///
/// Panics if the cache root has already been configured or resolved.
pub fn configure_cache_root(path: PathBuf) {
    info!(path = %path.display(), "Configuring cache root");
    if CACHE_ROOT.set(path).is_err() {
        panic!("cache root configured twice");
    }
}

/// Configure the auxiliary config root for this process.
///
/// # Panics
///
/// Panics if the config root has already been configured or resolved.
pub fn configure_config_root(path: PathBuf) {
    info!(path = %path.display(), "Configuring config root");
    if CONFIG_ROOT.set(path).is_err() {
        panic!("config root configured twice");
    }
}

/// The process-wide cache root, defaulting to
/// `<platform cache dir>/geofetch/cache`.
pub fn cache_root() -> PathBuf {
    CACHE_ROOT
        .get_or_init(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("geofetch")
                .join("cache")
        })
        .clone()
}

/// The process-wide config root, defaulting to
/// `<platform config dir>/geofetch`.
pub fn config_root() -> PathBuf {
    CONFIG_ROOT
        .get_or_init(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("geofetch")
        })
        .clone()
}
