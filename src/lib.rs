//! Listing-Harvest: a multi-site schedule and profile harvester
//!
//! This crate fetches schedule pages from a fixed set of listing sites, follows
//! each scheduled profile, normalizes the scraped fields into one canonical
//! schema, resolves free-text locations, and persists everything idempotently.

pub mod config;
pub mod extract;
pub mod harvest;
pub mod location;
pub mod normalize;
pub mod output;
pub mod sites;
pub mod storage;
pub mod transport;

use thiserror::Error;

/// Main error type for harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] transport::FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Unknown site key: {0}")]
    UnknownSite(String),

    #[error("No adapter registered for site '{0}'")]
    AdapterMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Structural parse failures
///
/// Missing individual fields are never errors; only a page whose expected
/// container is absent entirely is reported.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No {what} found on page")]
    MissingContainer { what: &'static str },
}

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use harvest::{Harvester, Orchestrator, RunResult};
pub use sites::{AdapterRegistry, ScheduleItem, ScrapedListing, SiteAdapter};
pub use storage::{SqliteStore, Store};
