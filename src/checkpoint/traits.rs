//! Checkpoint store trait and error types
//!
//! This module defines the interface the orchestrator uses to persist and
//! read back attempt history.

use crate::checkpoint::reduce::{reduce, Reduction};
use crate::checkpoint::record::{AttemptRecord, LoggedAttempt};
use crate::unit::UnitKey;
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Trait for attempt-history backends
///
/// Implementations must make `append` safe to call from many workers at once:
/// each record lands as one whole line, never interleaved with another.
pub trait CheckpointStore: Send + Sync {
    /// Appends one attempt record
    fn append(&self, record: &AttemptRecord) -> CheckpointResult<()>;

    /// Loads every attempt in log order
    ///
    /// Lines that cannot be interpreted are skipped, not fatal.
    fn load(&self) -> CheckpointResult<Vec<LoggedAttempt>>;

    /// Physically removes stale retryable failure records for the given units
    ///
    /// Success and benign terminal records are never removed. Returns the
    /// number of records removed.
    fn compact(&self, keys: &HashSet<UnitKey>) -> CheckpointResult<usize>;

    /// Reduces the full log to per-unit status
    fn reduce(&self) -> CheckpointResult<Reduction> {
        Ok(reduce(&self.load()?))
    }
}
