//! Background daemon for periodic cache pruning.
//!
//! The daemon runs in a separate thread and queues a pruning sweep on the
//! disk worker at a fixed interval. It can be cleanly shut down by calling
//! `shutdown()` or by dropping the `PruneDaemon` instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::disk::DiskStore;

/// Background daemon that schedules pruning sweeps.
pub struct PruneDaemon {
    /// Handle to the daemon thread
    thread_handle: Option<JoinHandle<()>>,
    /// Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl PruneDaemon {
    /// Start a new prune daemon.
    ///
    /// # Arguments
    ///
    /// * `store` - Disk store to prune
    /// * `interval` - How often to queue a sweep
    pub fn start(store: DiskStore, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let thread_handle = thread::Builder::new()
            .name("geofetch-prune".to_string())
            .spawn(move || {
                Self::run_loop(store, interval, shutdown_clone);
            })
            .expect("Failed to spawn prune daemon thread");

        info!(interval_secs = interval.as_secs(), "Prune daemon started");

        Self {
            thread_handle: Some(thread_handle),
            shutdown,
        }
    }

    /// The main daemon loop.
    fn run_loop(store: DiskStore, interval: Duration, shutdown: Arc<AtomicBool>) {
        // Sleep in short intervals so shutdown stays responsive.
        let check_interval = Duration::from_secs(1).min(interval);
        let mut elapsed = Duration::ZERO;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                debug!("Prune daemon received shutdown signal");
                break;
            }

            thread::sleep(check_interval);
            elapsed += check_interval;

            if elapsed >= interval {
                elapsed = Duration::ZERO;
                debug!("Queueing scheduled prune sweep");
                store.prune_in_background();
            }
        }

        debug!("Prune daemon stopped");
    }

    /// Signal the daemon to shut down.
    ///
    /// This is non-blocking. The daemon will stop at its next check
    /// interval. Call `join()` after this to wait for the thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Wait for the daemon thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(error) = handle.join() {
                warn!("Prune daemon thread panicked: {:?}", error);
            }
        }
    }

    /// Check if the daemon is still running.
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for PruneDaemon {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_daemon_starts_and_stops() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::start(temp.path().to_path_buf()).unwrap();

        let daemon = PruneDaemon::start(store, Duration::from_secs(3600));
        assert!(daemon.is_running());

        daemon.shutdown();
        thread::sleep(Duration::from_millis(1200));
        assert!(!daemon.is_running());
    }

    #[test]
    fn test_daemon_drop_triggers_shutdown() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::start(temp.path().to_path_buf()).unwrap();

        {
            let _daemon = PruneDaemon::start(store.clone(), Duration::from_secs(3600));
        }
        // Drop joins the thread; nothing to assert beyond not hanging.
    }
}
