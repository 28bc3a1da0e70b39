//! Run statistics
//!
//! Counts collected while a harvest runs, plus the reduction-based summary
//! used by `--stats`.

use crate::checkpoint::Reduction;
use crate::state::{FailureReason, UnitStatus};
use crate::unit::{HarvestTarget, UnitKey};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

/// How many failing units the summary lists per reason
pub const FAILURE_SAMPLE: usize = 5;

/// Scheduling phase a unit ran in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Repair,
    Expand,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Repair => "repair",
            Self::Expand => "expand",
        }
    }
}

/// What happened during one run
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Units scheduled in each phase
    pub scheduled_repair: u64,
    pub scheduled_expand: u64,

    /// Units that reached a recorded outcome
    pub attempted: u64,
    pub succeeded: u64,

    /// Successes among units scheduled for repair
    pub repaired: u64,

    /// Stale failure lines removed before the repair phase
    pub compacted: usize,

    /// Failure counts by recorded reason
    pub by_reason: BTreeMap<FailureReason, u64>,

    /// Failing units by recorded reason, in completion order
    pub failed_units: BTreeMap<FailureReason, Vec<UnitKey>>,

    /// Why scheduling stopped early, if it did
    pub halt_cause: Option<String>,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            scheduled_repair: 0,
            scheduled_expand: 0,
            attempted: 0,
            succeeded: 0,
            repaired: 0,
            compacted: 0,
            by_reason: BTreeMap::new(),
            failed_units: BTreeMap::new(),
            halt_cause: None,
        }
    }

    /// Records one unit's outcome; `None` means success
    pub fn record(&mut self, phase: Phase, key: &UnitKey, reason: Option<FailureReason>) {
        self.attempted += 1;
        match reason {
            None => {
                self.succeeded += 1;
                if phase == Phase::Repair {
                    self.repaired += 1;
                }
            }
            Some(reason) => {
                *self.by_reason.entry(reason).or_insert(0) += 1;
                self.failed_units
                    .entry(reason)
                    .or_default()
                    .push(key.clone());
            }
        }
    }

    /// Up to `limit` units that failed with `reason`
    pub fn failure_sample(&self, reason: FailureReason, limit: usize) -> &[UnitKey] {
        self.failed_units
            .get(&reason)
            .map_or(&[][..], |keys| &keys[..keys.len().min(limit)])
    }

    pub fn failed(&self) -> u64 {
        self.by_reason.values().sum()
    }

    /// Failures that are real errors rather than "nothing here"
    pub fn errors(&self) -> u64 {
        self.by_reason
            .iter()
            .filter(|(reason, _)| !reason.is_benign_terminal())
            .map(|(_, count)| count)
            .sum()
    }

    pub fn is_halted(&self) -> bool {
        self.halt_cause.is_some()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_seconds())
    }
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Prints the end-of-run summary to stdout
///
/// # Arguments
///
/// * `stats` - Statistics of the finished run
/// * `report_path` - Where the failure report was written
pub fn print_statistics(stats: &RunStatistics, report_path: &Path) {
    println!("\n=== Harvest Summary ===\n");

    println!("Scheduled:");
    println!("  Repair phase: {}", stats.scheduled_repair);
    println!("  Expand phase: {}", stats.scheduled_expand);
    if stats.compacted > 0 {
        println!("  Stale failure lines compacted: {}", stats.compacted);
    }
    println!();

    println!("Outcomes:");
    println!("  Attempted: {}", stats.attempted);
    println!("  Succeeded: {}", stats.succeeded);
    if stats.scheduled_repair > 0 {
        println!(
            "  Repaired: {} of {}",
            stats.repaired, stats.scheduled_repair
        );
    }
    println!("  Failed: {}", stats.failed());
    println!();

    if !stats.by_reason.is_empty() {
        println!("Failures by Reason:");
        let mut counts: Vec<_> = stats.by_reason.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (reason, count) in counts {
            let note = if reason.is_benign_terminal() {
                " (done, nothing to extract)"
            } else {
                ""
            };
            println!("  {}: {}{}", reason, count, note);
            let sample = stats.failure_sample(*reason, FAILURE_SAMPLE);
            if !sample.is_empty() {
                println!("    e.g. {}", describe_sample(sample, *count));
            }
        }
        println!();
    }

    if let Some(cause) = &stats.halt_cause {
        println!("Scheduling halted: {}", cause);
        println!();
    }

    if let Some(seconds) = stats.duration_seconds() {
        println!("Duration: {}s", seconds);
    }
    println!("Failure report: {}", report_path.display());
}

/// Renders sample unit ids, noting how many more failed
fn describe_sample(sample: &[UnitKey], total: u64) -> String {
    let ids: Vec<String> = sample.iter().map(UnitKey::unit_id).collect();
    let rest = total.saturating_sub(sample.len() as u64);
    if rest > 0 {
        format!("{} (+{} more)", ids.join(", "), rest)
    } else {
        ids.join(", ")
    }
}

/// Prints reduced checkpoint state for a target without touching the network
pub fn print_log_statistics(reduction: &Reduction, target: &HarvestTarget) {
    let requested = target.requested_keys();
    let partition = reduction.partition(&requested);

    let mut latest: BTreeMap<String, u64> = BTreeMap::new();
    for key in &partition.retry_eligible {
        let reason = reduction
            .state_of(key)
            .and_then(|state| state.latest_reason)
            .map_or("unknown", |reason| reason.as_str());
        *latest.entry(reason.to_string()).or_insert(0) += 1;
    }

    println!("=== Checkpoint Statistics ===\n");
    println!("Target: {}", target.scope());
    println!("  Units in log: {}", reduction.len());
    println!("  Requested: {}", requested.len());
    println!();

    println!("Units by Status:");
    for (status, count) in [
        (UnitStatus::Done, partition.done.len()),
        (UnitStatus::RetryEligible, partition.retry_eligible.len()),
        (UnitStatus::Unattempted, partition.unattempted.len()),
    ] {
        let percentage = if requested.is_empty() {
            0.0
        } else {
            (count as f64 / requested.len() as f64) * 100.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !latest.is_empty() {
        println!("Latest Failure Reasons:");
        for (reason, count) in latest {
            println!("  {}: {}", reason, count);
        }
    }
}
