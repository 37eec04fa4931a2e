//! GeoFetch CLI - command-line interface
//!
//! This binary provides a command-line interface to the GeoFetch library:
//! cached retrieval of single URLs and mirror lists, plus cache
//! maintenance.

use clap::{Parser, Subcommand};
use geofetch::{FetchConfig, Http};
use std::path::PathBuf;

mod commands;
mod error;

use commands::cache::CacheAction;
use commands::fetch::{FetchArgs, FetchFirstArgs};
use error::CliError;

#[derive(Parser)]
#[command(name = "geofetch")]
#[command(version = geofetch::VERSION)]
#[command(about = "Cached retrieval of remote geodata over HTTP(S)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Cache directory (defaults to the platform cache dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Disable the disk cache for this invocation
    #[arg(long, global = true)]
    no_cache: bool,

    /// Connect/read/write timeout in seconds
    #[arg(long, global = true, default_value_t = 20)]
    timeout: u64,

    /// Fallback cache TTL in minutes
    #[arg(long, global = true, default_value_t = 1440)]
    cache_ttl: u32,

    /// Per-host concurrency override entries ("N: hostname", repeatable)
    #[arg(long = "host-concurrency", global = true)]
    host_concurrency: Vec<String>,

    /// Write logs under this directory instead of "logs"
    #[arg(long, global = true)]
    log_dir: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch one URL through the cache
    Fetch(FetchArgs),
    /// Try mirror URLs in order; the first success wins
    FetchFirst(FetchFirstArgs),
    /// Cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| geofetch::logging::default_log_dir().to_string());
    let _logging = match geofetch::logging::init_logging(
        &log_dir,
        geofetch::logging::default_log_file(),
    ) {
        Ok(guard) => guard,
        Err(error) => CliError::LoggingInit(error.to_string()).exit(),
    };

    if let Err(error) = dispatch(cli).await {
        error.exit();
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let Cli {
        command,
        cache_dir,
        no_cache,
        timeout,
        cache_ttl,
        host_concurrency,
        log_dir: _,
    } = cli;

    match command {
        Command::Cache { action } => commands::cache::run(action, cache_dir).await,

        Command::Fetch(args) => {
            let http = engine(timeout, cache_ttl, no_cache, &host_concurrency, &cache_dir)?;
            commands::fetch::run(&http, args).await
        }

        Command::FetchFirst(args) => {
            let http = engine(timeout, cache_ttl, no_cache, &host_concurrency, &cache_dir)?;
            commands::fetch::run_first(&http, args).await
        }
    }
}

fn engine(
    timeout: u64,
    cache_ttl: u32,
    no_cache: bool,
    host_concurrency: &[String],
    cache_dir: &Option<PathBuf>,
) -> Result<Http, CliError> {
    let mut config = FetchConfig::new()
        .with_timeout_secs(timeout)
        .with_cache_ttl_minutes(cache_ttl)
        .with_caching_enabled(!no_cache)
        .with_host_overrides(host_concurrency);

    if let Some(dir) = cache_dir {
        config = config.with_cache_dir(dir.clone());
    }

    Http::new(config).map_err(CliError::Engine)
}
