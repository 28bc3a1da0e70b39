//! Checkpoint module for persisting attempt history
//!
//! This module handles:
//! - The append-only, line-oriented attempt log
//! - Reducing the log to per-unit status for scheduling and resume
//! - Compacting stale retryable failures before a repair phase
//! - The read side used by downstream consumers (success lines only)

mod jsonl;
mod record;
mod reduce;
mod traits;

pub use jsonl::{read_success_lines, reduce_log, JsonlCheckpoint};
pub use record::{AttemptRecord, AttemptStatus, LoggedAttempt};
pub use reduce::{reduce, Partition, Reduction, UnitState};
pub use traits::{CheckpointError, CheckpointResult, CheckpointStore};

use std::path::Path;

/// Opens the checkpoint log at the given path, creating it if needed
pub fn open_checkpoint(path: &Path) -> CheckpointResult<JsonlCheckpoint> {
    JsonlCheckpoint::open(path)
}
