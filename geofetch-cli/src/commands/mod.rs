//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`cache`] - Cache maintenance (prune, stats)
//! - [`fetch`] - Single-URL and mirror-list retrieval

pub mod cache;
pub mod fetch;
