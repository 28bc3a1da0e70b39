//! Reduction of attempt history to per-unit status
//!
//! A unit is `Done` if any of its records is a success or a benign terminal
//! failure. Otherwise, if it has records at all, its latest record is a
//! retryable failure and it is `RetryEligible`. Units with no records are
//! `Unattempted`. Exactly one of the three holds for every unit.

use crate::checkpoint::record::{AttemptStatus, LoggedAttempt};
use crate::state::{FailureReason, UnitStatus};
use crate::unit::UnitKey;
use std::collections::{BTreeSet, HashMap};

/// Reduced state of a single unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitState {
    pub status: UnitStatus,

    /// Number of attempt records seen for the unit
    pub attempts: u32,

    /// Reason on the most recent failure record, if any
    pub latest_reason: Option<FailureReason>,
}

/// Status of every unit that appears in the log
#[derive(Debug, Clone, Default)]
pub struct Reduction {
    units: HashMap<UnitKey, UnitState>,
}

/// A requested unit set split by reduced status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub done: BTreeSet<UnitKey>,
    pub retry_eligible: BTreeSet<UnitKey>,
    pub unattempted: BTreeSet<UnitKey>,
}

/// Reduces attempts (in log order) to per-unit state
pub fn reduce(attempts: &[LoggedAttempt]) -> Reduction {
    let mut units: HashMap<UnitKey, UnitState> = HashMap::new();

    for attempt in attempts {
        let state = units.entry(attempt.key.clone()).or_insert(UnitState {
            status: UnitStatus::RetryEligible,
            attempts: 0,
            latest_reason: None,
        });

        state.attempts += 1;
        if attempt.status == AttemptStatus::Failed {
            state.latest_reason = attempt.reason;
        }
        if attempt.is_settling() {
            state.status = UnitStatus::Done;
        }
    }

    Reduction { units }
}

impl Reduction {
    /// Reduced status of a unit; `Unattempted` if the log never mentions it
    pub fn status_of(&self, key: &UnitKey) -> UnitStatus {
        self.units
            .get(key)
            .map_or(UnitStatus::Unattempted, |state| state.status)
    }

    pub fn state_of(&self, key: &UnitKey) -> Option<&UnitState> {
        self.units.get(key)
    }

    /// Units that are finished for good
    pub fn done(&self) -> BTreeSet<UnitKey> {
        self.keys_with(UnitStatus::Done)
    }

    /// Units a repair phase should revisit
    pub fn retry_eligible(&self) -> BTreeSet<UnitKey> {
        self.keys_with(UnitStatus::RetryEligible)
    }

    /// Splits a requested unit set by reduced status
    pub fn partition<'a>(&self, keys: impl IntoIterator<Item = &'a UnitKey>) -> Partition {
        let mut partition = Partition::default();
        for key in keys {
            let bucket = match self.status_of(key) {
                UnitStatus::Done => &mut partition.done,
                UnitStatus::RetryEligible => &mut partition.retry_eligible,
                UnitStatus::Unattempted => &mut partition.unattempted,
            };
            bucket.insert(key.clone());
        }
        partition
    }

    /// Iterates every unit the log mentions
    pub fn iter(&self) -> impl Iterator<Item = (&UnitKey, &UnitState)> {
        self.units.iter()
    }

    /// Number of distinct units in the log
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn keys_with(&self, status: UnitStatus) -> BTreeSet<UnitKey> {
        self.units
            .iter()
            .filter(|(_, state)| state.status == status)
            .map(|(key, _)| key.clone())
            .collect()
    }
}
