//! Sanad-Harvest: a resumable harvester for paged archives
//!
//! This crate fetches pages of a book or narrator profiles through a paid
//! scraping proxy, classifies every outcome into a small failure taxonomy,
//! and records each attempt in an append-only checkpoint log. Runs repair
//! earlier failures first, then expand into units never attempted.

pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod unit;

use thiserror::Error;

/// Main error type for harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write failure report to {path}: {message}")]
    Report { path: String, message: String },
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

    #[error("No proxy credentials configured (set proxy.api-keys, --api-key, or HARVEST_API_KEYS)")]
    NoCredentials,
}

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{FailureReason, UnitStatus};
pub use unit::{HarvestTarget, UnitKey, WorkUnit};
