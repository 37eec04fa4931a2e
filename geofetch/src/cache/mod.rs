//! On-disk response cache: freshness model, binary codec, and the disk
//! I/O worker.

pub mod control;
pub mod daemon;
pub mod disk;
pub mod entry;
pub mod key;
pub mod roots;

pub use control::CacheControl;
pub use daemon::PruneDaemon;
pub use disk::{CacheError, DiskStats, DiskStore, PruneStats};
pub use entry::{CacheEntry, CodecError, EntryError, EntryStatus, CACHE_FORMAT_VERSION, NEVER};
pub use key::cache_key;
