//! Disk store with a dedicated I/O worker and crash-safe writes.
//!
//! All file I/O runs on a single worker thread; callers talk to it through
//! a command channel and receive results over oneshot completions. Because
//! every write is serialized onto that one worker, the store can reuse a
//! single shared temporary filename for its write-then-rename protocol
//! without racing. A port of this store to multiple workers must switch to
//! unique temporary names per in-flight write to keep renames atomic.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cache::entry::CacheEntry;
use crate::time::now_millis;

/// Shared temporary filename used by the write-then-rename protocol.
const TEMP_FILE_NAME: &str = "write.tmp";

/// How much of a cache file pruning reads to evaluate its header.
const PRUNE_HEADER_BYTES: u64 = 64 * 1024;

/// Safety net: files untouched for this long are pruned regardless of what
/// their parsed header claims (30 days).
const MAX_FILE_IDLE_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Errors from disk store operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker thread has stopped (all handles dropped or panicked)
    #[error("cache worker stopped")]
    WorkerStopped,
}

/// Result of one pruning sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Files examined by the sweep
    pub examined: u64,
    /// Files removed because their entry had expired
    pub removed_expired: u64,
    /// Files removed because they failed to parse
    pub removed_corrupt: u64,
    /// Files removed by the modification-time safety net
    pub removed_idle: u64,
}

impl PruneStats {
    /// Total files removed by the sweep.
    pub fn removed(&self) -> u64 {
        self.removed_expired + self.removed_corrupt + self.removed_idle
    }
}

/// Point-in-time size of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskStats {
    /// Number of cache files
    pub files: u64,
    /// Total bytes across cache files
    pub bytes: u64,
}

enum DiskCommand {
    Read {
        key: String,
        reply: oneshot::Sender<Result<Option<Vec<u8>>, CacheError>>,
    },
    Write {
        key: String,
        bytes: Vec<u8>,
    },
    Prune {
        reply: Option<oneshot::Sender<Result<PruneStats, CacheError>>>,
    },
    Stats {
        reply: oneshot::Sender<Result<DiskStats, CacheError>>,
    },
}

/// Handle to the disk store worker.
///
/// Cloning is cheap; all clones feed the same worker. The worker exits
/// when the last handle is dropped.
#[derive(Clone)]
pub struct DiskStore {
    tx: mpsc::UnboundedSender<DiskCommand>,
}

impl DiskStore {
    /// Start the disk store over the given root directory, creating it if
    /// needed, and spawn the I/O worker.
    pub fn start(root: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&root)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker { root };
        std::thread::Builder::new()
            .name("geofetch-disk".to_string())
            .spawn(move || worker.run(rx))
            .map_err(CacheError::Io)?;

        Ok(Self { tx })
    }

    /// Read a cache file.
    ///
    /// Returns `None` when the file does not exist; any other I/O error is
    /// surfaced as a failure, not treated as absence.
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DiskCommand::Read {
                key: key.to_string(),
                reply,
            })
            .map_err(|_| CacheError::WorkerStopped)?;
        rx.await.map_err(|_| CacheError::WorkerStopped)?
    }

    /// Queue a cache file write.
    ///
    /// Persistence is best-effort: failures are logged by the worker and
    /// never propagate to the fetch that triggered them.
    pub fn write(&self, key: &str, bytes: Vec<u8>) {
        let _ = self.tx.send(DiskCommand::Write {
            key: key.to_string(),
            bytes,
        });
    }

    /// Run a pruning sweep now and wait for its result.
    pub async fn prune(&self) -> Result<PruneStats, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DiskCommand::Prune { reply: Some(reply) })
            .map_err(|_| CacheError::WorkerStopped)?;
        rx.await.map_err(|_| CacheError::WorkerStopped)?
    }

    /// Queue a pruning sweep without waiting for it.
    pub fn prune_in_background(&self) {
        let _ = self.tx.send(DiskCommand::Prune { reply: None });
    }

    /// Count cache files and bytes on disk.
    pub async fn stats(&self) -> Result<DiskStats, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DiskCommand::Stats { reply })
            .map_err(|_| CacheError::WorkerStopped)?;
        rx.await.map_err(|_| CacheError::WorkerStopped)?
    }
}

struct Worker {
    root: PathBuf,
}

impl Worker {
    fn run(self, mut rx: mpsc::UnboundedReceiver<DiskCommand>) {
        debug!(root = %self.root.display(), "Disk worker started");

        while let Some(command) = rx.blocking_recv() {
            match command {
                DiskCommand::Read { key, reply } => {
                    let _ = reply.send(self.read(&key));
                }
                DiskCommand::Write { key, bytes } => {
                    if let Err(error) = self.write(&key, &bytes) {
                        warn!(key = %key, error = %error, "Cache write failed");
                    }
                }
                DiskCommand::Prune { reply } => {
                    let result = self.prune(now_millis());
                    match (reply, result) {
                        (Some(reply), result) => {
                            let _ = reply.send(result);
                        }
                        (None, Ok(stats)) => {
                            info!(
                                examined = stats.examined,
                                removed = stats.removed(),
                                "Cache prune sweep finished"
                            );
                        }
                        (None, Err(error)) => {
                            warn!(error = %error, "Cache prune sweep failed");
                        }
                    }
                }
                DiskCommand::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
            }
        }

        debug!("Disk worker stopped");
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let temp = self.root.join(TEMP_FILE_NAME);
        let target = self.path_for(key);

        fs::write(&temp, bytes)?;
        fs::rename(&temp, &target)?;

        // Bump mtime so the idle safety net in prune() sees fresh use even
        // when the filesystem preserved an old timestamp across rename.
        let file = fs::File::options().append(true).open(&target)?;
        file.set_times(fs::FileTimes::new().set_modified(SystemTime::now()))?;

        Ok(())
    }

    fn prune(&self, now: i64) -> Result<PruneStats, CacheError> {
        let mut stats = PruneStats::default();

        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = match dir_entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(error = %error, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let path = dir_entry.path();
            if !path.is_file() || path.file_name().is_some_and(|n| n == TEMP_FILE_NAME) {
                continue;
            }

            stats.examined += 1;

            match Self::classify(&path, now) {
                FileVerdict::Keep => {}
                FileVerdict::Expired => {
                    stats.removed_expired += Self::remove(&path);
                }
                FileVerdict::Corrupt => {
                    stats.removed_corrupt += Self::remove(&path);
                }
                FileVerdict::Idle => {
                    stats.removed_idle += Self::remove(&path);
                }
            }
        }

        Ok(stats)
    }

    /// Decide a single file's fate. Any per-file failure downgrades to a
    /// verdict rather than aborting the sweep.
    fn classify(path: &Path, now: i64) -> FileVerdict {
        let idle = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(crate::time::system_time_to_millis)
            .is_some_and(|mtime| now.saturating_sub(mtime) > MAX_FILE_IDLE_MILLIS);
        if idle {
            return FileVerdict::Idle;
        }

        let mut header = Vec::new();
        let read = fs::File::open(path)
            .map(|file| file.take(PRUNE_HEADER_BYTES))
            .and_then(|mut reader| reader.read_to_end(&mut header));
        if read.is_err() {
            return FileVerdict::Corrupt;
        }

        match CacheEntry::decode_prefix(&header) {
            Ok(entry) if entry.is_expired(now) => FileVerdict::Expired,
            Ok(_) => FileVerdict::Keep,
            Err(_) => FileVerdict::Corrupt,
        }
    }

    fn remove(path: &Path) -> u64 {
        match fs::remove_file(path) {
            Ok(()) => 1,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Failed to remove cache file");
                0
            }
        }
    }

    fn stats(&self) -> Result<DiskStats, CacheError> {
        let mut stats = DiskStats::default();
        for dir_entry in fs::read_dir(&self.root)? {
            let Ok(dir_entry) = dir_entry else { continue };
            let path = dir_entry.path();
            if !path.is_file() || path.file_name().is_some_and(|n| n == TEMP_FILE_NAME) {
                continue;
            }
            if let Ok(meta) = dir_entry.metadata() {
                stats.files += 1;
                stats.bytes += meta.len();
            }
        }
        Ok(stats)
    }
}

enum FileVerdict {
    Keep,
    Expired,
    Corrupt,
    Idle,
}
