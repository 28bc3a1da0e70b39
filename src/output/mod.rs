//! Output module for run summaries and reports
//!
//! This module handles:
//! - Collecting and printing per-run statistics
//! - Writing the machine-readable failure report
//! - Auditing checkpoint coverage of a target

mod audit;
mod report;
pub mod stats;

pub use audit::{print_audit, CoverageAudit};
pub use report::{FailureReport, ReasonCount, StillFailing};
pub use stats::{print_log_statistics, print_statistics, Phase, RunStatistics};
