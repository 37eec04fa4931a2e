//! Fetch CLI commands: single URL and mirror-list retrieval.

use clap::Args;
use geofetch::Http;
use std::io::Write;
use std::path::PathBuf;

use crate::error::{CliError, EXIT_ABSENT};

/// Arguments for the `fetch` command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// URL to fetch (http://, https:// or file://)
    pub url: String,

    /// Write the body to this file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the `fetch-first` command.
#[derive(Debug, Args)]
pub struct FetchFirstArgs {
    /// Mirror URLs, tried in order; the first success wins
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Write the body to this file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Run a single fetch through the full engine.
pub async fn run(http: &Http, args: FetchArgs) -> Result<(), CliError> {
    let bytes = http.get(&args.url).await.map_err(CliError::Fetch)?;
    deliver(&args.url, bytes, args.output.as_deref())
}

/// Run a mirror-fallback fetch; bytes pass through unparsed.
pub async fn run_first(http: &Http, args: FetchFirstArgs) -> Result<(), CliError> {
    let bytes = http
        .get_first(&args.urls, Ok::<_, std::convert::Infallible>)
        .await
        .map_err(CliError::Fetch)?;
    deliver(&args.urls[0], bytes, args.output.as_deref())
}

fn deliver(
    url: &str,
    bytes: Option<bytes::Bytes>,
    output: Option<&std::path::Path>,
) -> Result<(), CliError> {
    let Some(bytes) = bytes else {
        eprintln!("{url}: not found");
        std::process::exit(EXIT_ABSENT);
    };

    match output {
        Some(path) => {
            std::fs::write(path, &bytes).map_err(|error| CliError::FileWrite {
                path: path.display().to_string(),
                error,
            })?;
            eprintln!("Wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => {
            std::io::stdout()
                .write_all(&bytes)
                .map_err(|error| CliError::FileWrite {
                    path: "stdout".to_string(),
                    error,
                })?;
        }
    }
    Ok(())
}
