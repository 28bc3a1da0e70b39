//! Machine-readable failure report written at the end of every run

use crate::checkpoint::Reduction;
use crate::output::stats::RunStatistics;
use crate::state::{FailureReason, UnitStatus};
use crate::unit::{HarvestTarget, UnitKey};
use crate::HarvestError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonCount {
    pub reason: FailureReason,
    pub count: u64,
}

/// A unit still retry-eligible after the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StillFailing {
    pub unit_id: String,

    /// Latest recorded reason; absent for legacy lines without one
    pub reason: Option<FailureReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub run_timestamp: String,
    pub scope: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,

    /// Failures recorded during this run
    pub by_reason: Vec<ReasonCount>,

    /// Units of the target left retry-eligible in the log
    pub still_failing: Vec<StillFailing>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

impl FailureReport {
    /// Builds the report from this run's statistics and the final log state
    pub fn build(
        stats: &RunStatistics,
        reduction: &Reduction,
        target: &HarvestTarget,
        config_hash: Option<String>,
    ) -> Self {
        let by_reason = stats
            .by_reason
            .iter()
            .map(|(reason, count)| ReasonCount {
                reason: *reason,
                count: *count,
            })
            .collect();

        let mut failing: Vec<(&UnitKey, Option<FailureReason>)> = reduction
            .iter()
            .filter(|(key, state)| target.owns(key) && state.status == UnitStatus::RetryEligible)
            .map(|(key, state)| (key, state.latest_reason))
            .collect();
        failing.sort_by(|a, b| a.0.cmp(b.0));

        Self {
            run_timestamp: stats.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            scope: target.scope(),
            config_hash,
            by_reason,
            still_failing: failing
                .into_iter()
                .map(|(key, reason)| StillFailing {
                    unit_id: key.unit_id(),
                    reason,
                })
                .collect(),
            halted: stats.halt_cause.clone(),
        }
    }

    /// Writes the report as pretty-printed JSON, creating parent directories
    ///
    /// Serialization failures surface as `HarvestError::Json`, filesystem
    /// failures as `HarvestError::Report`.
    pub fn write(&self, path: &Path) -> Result<(), HarvestError> {
        let report_error = |message: String| HarvestError::Report {
            path: path.display().to_string(),
            message,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| report_error(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json + "\n").map_err(|e| report_error(e.to_string()))?;
        Ok(())
    }
}
