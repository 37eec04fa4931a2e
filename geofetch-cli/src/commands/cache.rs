//! Cache maintenance CLI commands.

use clap::Subcommand;
use geofetch::cache::{roots, DiskStore};
use std::path::PathBuf;

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Delete expired and unparsable cache files now
    Prune,
    /// Show disk cache statistics
    Stats,
}

/// Run a cache subcommand against the cache directory.
pub async fn run(action: CacheAction, cache_dir: Option<PathBuf>) -> Result<(), CliError> {
    let root = cache_dir.unwrap_or_else(roots::cache_root);
    let store = DiskStore::start(root.clone()).map_err(|e| CliError::Cache(e.to_string()))?;

    match action {
        CacheAction::Prune => {
            println!("Pruning cache at: {}", root.display());

            let stats = store
                .prune()
                .await
                .map_err(|e| CliError::Cache(e.to_string()))?;
            println!(
                "Examined {} files: removed {} expired, {} corrupt, {} idle",
                stats.examined, stats.removed_expired, stats.removed_corrupt, stats.removed_idle
            );
            Ok(())
        }
        CacheAction::Stats => {
            println!("Disk cache: {}", root.display());

            let stats = store
                .stats()
                .await
                .map_err(|e| CliError::Cache(e.to_string()))?;
            println!("  Files: {}", stats.files);
            println!("  Size:  {}", format_size(stats.bytes));
            Ok(())
        }
    }
}

/// Render a byte count with a binary unit suffix.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
