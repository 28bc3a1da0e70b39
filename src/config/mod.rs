//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sanad_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Batches of {} units", config.harvest.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, HarvestConfig, OutputConfig, ProxyConfig, RetryConfig, TargetConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};

pub use validation::validate_credentials;
