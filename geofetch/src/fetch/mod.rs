//! The public fetch API.
//!
//! [`Http::get`] runs the full retrieval state machine for one URL:
//! cache lookup, freshness decision, conditional or full network request,
//! disk persistence, redirect following, and result delivery. Mirror
//! fallback lives in [`mirror`] as [`Http::get_first`].
//!
//! Callers only ever see bytes, "absent", or a single failure; stale
//! fallback, revalidation, and redirect hops stay internal.

pub mod mirror;

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::{
    cache_key, roots, CacheEntry, CacheError, DiskStore, EntryError, EntryStatus, PruneDaemon,
};
use crate::config::FetchConfig;
use crate::net::{request_target, Host, HostManager, NetConfig, NetError, Response};
use crate::time::now_millis;

/// Redirect chains beyond this depth fail rather than recurse further.
pub const MAX_REDIRECT_HOPS: usize = 16;

/// Errors surfaced to fetch callers.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL string does not parse
    #[error("invalid URL \"{url}\": {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A `file://` URL does not map onto a local path
    #[error("\"{url}\" is not a local file path")]
    LocalPath { url: String },

    /// Transport failure
    #[error(transparent)]
    Net(#[from] NetError),

    /// The disk store could not be started
    #[error("cache initialization failed: {0}")]
    Cache(#[from] CacheError),

    /// An HTTP status outside {2xx, 3xx, 404}
    #[error("unhandled HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// A redirect response without a target
    #[error("redirect from {url} carried no Location header")]
    MissingLocation { url: String },

    /// A 304 arrived for a request that was not conditional
    #[error("unexpected 304 Not Modified from {url}")]
    UnexpectedNotModified { url: String },

    /// Redirects kept chaining past [`MAX_REDIRECT_HOPS`]
    #[error("redirect chain exceeded {0} hops")]
    TooManyRedirects(usize),

    /// Local file I/O failure on a `file://` fetch
    #[error("reading local file failed: {0}")]
    Io(#[from] std::io::Error),

    /// The caller-supplied parser rejected a response body
    #[error("failed to parse response from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Every mirror failed and none resolved to a definitive "missing";
    /// carries each suppressed cause for diagnosis
    #[error("every mirror failed ({} suppressed errors)", .causes.len())]
    AllMirrorsFailed { causes: Vec<FetchError> },
}

/// The cached fetch engine.
///
/// Cloning is cheap and shares the cache, the host-manager registry, and
/// all configuration.
#[derive(Clone)]
pub struct Http {
    inner: Arc<Inner>,
}

struct Inner {
    config: FetchConfig,
    net_config: NetConfig,
    disk: Option<DiskStore>,
    managers: DashMap<Host, HostManager>,
    /// Per-hostname concurrency caps, seeded from config and adjustable
    /// at runtime.
    overrides: DashMap<String, usize>,
    /// Keeps the scheduled prune sweeps alive for the engine's lifetime.
    _prune: Option<PruneDaemon>,
}

/// One step of the redirect-following loop.
enum Hop {
    Done(Option<Bytes>),
    Follow(String),
}

impl Http {
    /// Start the engine: bring up the disk store and prune schedule (when
    /// caching is enabled) and prepare the lazily populated per-host
    /// manager registry.
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let net_config = NetConfig::from(&config);

        let (disk, prune) = if config.caching_enabled() {
            let root = config
                .cache_dir()
                .cloned()
                .unwrap_or_else(roots::cache_root);
            let store = DiskStore::start(root)?;
            let daemon = PruneDaemon::start(store.clone(), config.prune_interval());
            (Some(store), Some(daemon))
        } else {
            info!("Disk caching disabled; all fetches go to the network");
            (None, None)
        };

        let overrides = DashMap::new();
        for (hostname, max) in config.host_overrides() {
            overrides.insert(hostname.clone(), *max);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                net_config,
                disk,
                managers: DashMap::new(),
                overrides,
                _prune: prune,
            }),
        })
    }

    /// Fetch a URL through the cache.
    ///
    /// Resolves to `Some(bytes)` for a successful response, `None` when
    /// the resource definitively does not exist (a live or cached 404),
    /// or an error. Redirects are followed transparently; `file://` URLs
    /// are read from the local filesystem with no caching.
    pub async fn get(&self, url: &str) -> Result<Option<Bytes>, FetchError> {
        let mut current = Url::parse(url).map_err(|source| FetchError::Url {
            url: url.to_string(),
            source,
        })?;

        for _hop in 0..MAX_REDIRECT_HOPS {
            if current.scheme() == "file" {
                return read_local(&current).await;
            }

            match self.fetch_one(&current).await? {
                Hop::Done(result) => return Ok(result),
                Hop::Follow(location) => {
                    trace!(from = %current, to = %location, "Following redirect");
                    current = current.join(&location).map_err(|source| FetchError::Url {
                        url: location.clone(),
                        source,
                    })?;
                }
            }
        }

        Err(FetchError::TooManyRedirects(MAX_REDIRECT_HOPS))
    }

    /// Adjust the concurrency cap for a hostname, for existing managers
    /// and any created later.
    pub fn set_max_concurrent(&self, hostname: &str, max: usize) {
        let max = max.max(1);
        self.inner.overrides.insert(hostname.to_string(), max);
        for entry in self.inner.managers.iter() {
            if entry.key().hostname == hostname {
                entry.value().set_max_concurrent(max);
            }
        }
    }

    /// Run the cache/network state machine for a single URL, yielding
    /// either a final result or a redirect to follow.
    async fn fetch_one(&self, url: &Url) -> Result<Hop, FetchError> {
        let key = cache_key(url.as_str());
        let now = now_millis();

        let cached = match &self.inner.disk {
            Some(disk) => match disk.read(&key).await {
                Ok(Some(bytes)) => CacheEntry::decode(&bytes).ok(),
                Ok(None) => None,
                Err(error) => {
                    // A cache that cannot be read degrades to a miss; the
                    // network path still serves the caller.
                    warn!(url = %url, error = %error, "Cache read failed");
                    None
                }
            },
            None => None,
        }
        // 304 markers are never persisted standalone; anything claiming
        // to be one is treated as a miss.
        .filter(|(entry, _)| entry.status != EntryStatus::NotModified);

        match cached {
            Some((entry, body)) if !entry.is_expired(now) => {
                if !entry.is_stale(now) {
                    trace!(url = %url, status = ?entry.status, "Fresh cache hit");
                    self.conclude(url, entry, body)
                } else {
                    self.revalidate(url, &key, entry, body).await
                }
            }
            _ => self.fetch_fresh(url, &key).await,
        }
    }

    /// Plain network fetch with no conditional headers (cache miss or
    /// expired entry).
    async fn fetch_fresh(&self, url: &Url, key: &str) -> Result<Hop, FetchError> {
        debug!(url = %url, "Cache miss; fetching");
        let response = self.transport(url, Vec::new()).await?;
        self.resolve(url, key, response)
    }

    /// Conditional fetch for a stale-but-usable entry. A 304 carries the
    /// old body into a refreshed entry; a transport failure falls back to
    /// the stale data instead of failing the caller.
    async fn revalidate(
        &self,
        url: &Url,
        key: &str,
        entry: CacheEntry,
        body: Option<Bytes>,
    ) -> Result<Hop, FetchError> {
        debug!(url = %url, "Stale cache entry; revalidating");
        let mut headers = Vec::new();
        entry.touch(&mut headers);

        match self.transport(url, headers).await {
            Ok(response) if response.status == 304 => {
                trace!(url = %url, "Revalidated, not modified");
                let refreshed = CacheEntry::revalidated(
                    &entry,
                    &response.headers,
                    self.inner.config.cache_ttl_millis(),
                );
                self.persist(key, &refreshed, body.as_deref());
                self.conclude(url, refreshed, body)
            }
            Ok(response) => self.resolve(url, key, response),
            Err(error) => {
                warn!(url = %url, error = %error, "Revalidation failed; serving stale entry");
                self.conclude(url, entry, body)
            }
        }
    }

    /// Map a live response onto a cache entry, persist it, and conclude.
    fn resolve(&self, url: &Url, key: &str, response: Response) -> Result<Hop, FetchError> {
        let entry = CacheEntry::from_response(
            response.status,
            &response.headers,
            self.inner.config.cache_ttl_millis(),
        )
        .map_err(|error| match error {
            EntryError::UnknownStatus(status) => FetchError::Status {
                status,
                url: url.to_string(),
            },
            EntryError::MissingLocation => FetchError::MissingLocation {
                url: url.to_string(),
            },
        })?;

        if entry.status == EntryStatus::NotModified {
            return Err(FetchError::UnexpectedNotModified {
                url: url.to_string(),
            });
        }

        let body = (entry.status == EntryStatus::Success).then(|| response.body.clone());
        self.persist(key, &entry, body.as_deref());
        self.conclude(url, entry, body)
    }

    /// Turn a resolved entry into the caller-visible outcome.
    fn conclude(
        &self,
        url: &Url,
        entry: CacheEntry,
        body: Option<Bytes>,
    ) -> Result<Hop, FetchError> {
        match entry.status {
            EntryStatus::Success => Ok(Hop::Done(Some(body.unwrap_or_default()))),
            EntryStatus::NotFound => Ok(Hop::Done(None)),
            EntryStatus::Redirect => {
                entry
                    .location
                    .map(Hop::Follow)
                    .ok_or_else(|| FetchError::MissingLocation {
                        url: url.to_string(),
                    })
            }
            EntryStatus::NotModified => Err(FetchError::UnexpectedNotModified {
                url: url.to_string(),
            }),
        }
    }

    /// Best-effort persistence; `no-store` entries and disabled caching
    /// skip the write entirely.
    fn persist(&self, key: &str, entry: &CacheEntry, body: Option<&[u8]>) {
        let Some(disk) = &self.inner.disk else {
            return;
        };
        if entry.no_store {
            trace!(key = %key, "Entry marked no-store; skipping persistence");
            return;
        }
        disk.write(key, entry.encode(body));
    }

    /// Hand the request to the host's manager and wait for the exchange.
    async fn transport(
        &self,
        url: &Url,
        headers: Vec<(String, String)>,
    ) -> Result<Response, NetError> {
        let host = Host::from_url(url)?;
        let manager = self.manager_for(&host);
        let receiver = manager.submit(request_target(url), headers);
        receiver.await.map_err(|_| NetError::Dropped)?
    }

    /// Look up or lazily create the manager for a host. Insertion runs
    /// under the registry shard lock, so exactly one manager ever exists
    /// per host.
    fn manager_for(&self, host: &Host) -> HostManager {
        self.inner
            .managers
            .entry(host.clone())
            .or_insert_with(|| {
                let cap = self
                    .inner
                    .overrides
                    .get(&host.hostname)
                    .map(|entry| *entry.value())
                    .unwrap_or_else(|| self.inner.config.max_concurrent_per_host());
                debug!(host = %host, max_concurrent = cap, "Creating host manager");
                HostManager::spawn(host.clone(), self.inner.net_config.clone(), cap)
            })
            .value()
            .clone()
    }

    /// Direct access to the disk store, if caching is enabled. Used by
    /// operational tooling (prune/stats commands).
    pub fn disk(&self) -> Option<&DiskStore> {
        self.inner.disk.as_ref()
    }
}

/// Read a `file://` URL directly from the local filesystem, with no
/// caching and no connection management.
async fn read_local(url: &Url) -> Result<Option<Bytes>, FetchError> {
    let path = url.to_file_path().map_err(|_| FetchError::LocalPath {
        url: url.to_string(),
    })?;

    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(Bytes::from(bytes))),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}
