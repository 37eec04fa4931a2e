//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use geofetch::FetchError;
use std::fmt;
use std::process;

/// Exit code used when a resource resolves to "absent" (a definitive
/// 404) rather than an error, so scripts can tell the cases apart.
pub const EXIT_ABSENT: i32 = 4;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Failed to start the fetch engine
    Engine(FetchError),
    /// A fetch failed
    Fetch(FetchError),
    /// Failed to write output file
    FileWrite { path: String, error: std::io::Error },
    /// A cache maintenance operation failed
    Cache(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Fetch(FetchError::AllMirrorsFailed { causes }) = self {
            eprintln!();
            eprintln!("Suppressed mirror failures:");
            for cause in causes {
                eprintln!("  - {cause}");
            }
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Engine(e) => write!(f, "Failed to start fetch engine: {}", e),
            CliError::Fetch(e) => write!(f, "Fetch failed: {}", e),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write {}: {}", path, error)
            }
            CliError::Cache(msg) => write!(f, "Cache operation failed: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let error = CliError::LoggingInit("disk full".to_string());
        assert_eq!(
            error.to_string(),
            "Failed to initialize logging: disk full"
        );

        let error = CliError::Cache("prune failed".to_string());
        assert_eq!(error.to_string(), "Cache operation failed: prune failed");
    }
}
