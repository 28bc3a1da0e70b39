//! Coverage audit of a checkpoint log against a target

use crate::checkpoint::Reduction;
use crate::state::UnitStatus;
use crate::unit::{HarvestTarget, UnitKey};
use std::collections::BTreeMap;

/// How much of a target the log accounts for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageAudit {
    pub scope: String,
    pub expected: usize,

    /// Requested units with at least one record
    pub seen: usize,
    pub done: usize,
    pub retry_eligible: usize,

    /// Requested units never attempted
    pub missing: usize,

    /// Latest failure reason of each retry-eligible unit, counted
    pub latest_reasons: BTreeMap<String, usize>,

    /// First missing unit ids in schedule order
    pub missing_sample: Vec<String>,
}

impl CoverageAudit {
    /// Audits `target` against the reduced log
    ///
    /// # Arguments
    ///
    /// * `target` - The requested units
    /// * `reduction` - Reduced checkpoint state
    /// * `sample_limit` - How many missing ids to keep for display
    pub fn run(target: &HarvestTarget, reduction: &Reduction, sample_limit: usize) -> Self {
        let requested: Vec<UnitKey> = target.requested_keys();
        let partition = reduction.partition(&requested);

        let mut latest_reasons = BTreeMap::new();
        for key in &partition.retry_eligible {
            let reason = reduction
                .state_of(key)
                .and_then(|state| state.latest_reason)
                .map_or("unknown", |reason| reason.as_str());
            *latest_reasons.entry(reason.to_string()).or_insert(0) += 1;
        }

        let missing_sample = requested
            .iter()
            .filter(|key| reduction.status_of(key) == UnitStatus::Unattempted)
            .take(sample_limit)
            .map(UnitKey::unit_id)
            .collect();

        Self {
            scope: target.scope(),
            expected: requested.len(),
            seen: partition.done.len() + partition.retry_eligible.len(),
            done: partition.done.len(),
            retry_eligible: partition.retry_eligible.len(),
            missing: partition.unattempted.len(),
            latest_reasons,
            missing_sample,
        }
    }

    /// True when every requested unit is done
    pub fn is_complete(&self) -> bool {
        self.done == self.expected
    }
}

/// Prints the audit to stdout
pub fn print_audit(audit: &CoverageAudit) {
    println!("=== Coverage Audit ===\n");
    println!("Target: {}", audit.scope);
    println!("  Expected: {}", audit.expected);
    println!("  Seen in log: {}", audit.seen);
    println!("  Done: {}", audit.done);
    println!("  Retry-eligible: {}", audit.retry_eligible);
    println!("  Never attempted: {}", audit.missing);
    println!();

    if !audit.latest_reasons.is_empty() {
        println!("Latest Failure Reasons:");
        for (reason, count) in &audit.latest_reasons {
            println!("  {}: {}", reason, count);
        }
        println!();
    }

    if !audit.missing_sample.is_empty() {
        println!(
            "Missing (first {} of {}): {}",
            audit.missing_sample.len(),
            audit.missing,
            audit.missing_sample.join(", ")
        );
    }

    if audit.is_complete() {
        println!("Coverage complete.");
    }
}
