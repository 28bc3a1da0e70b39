/// Reduced status of a work unit
///
/// Never stored: it is recomputed from the checkpoint log on every run.
use std::fmt;

/// Where a unit stands after reducing all of its attempt records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitStatus {
    /// A success or benign terminal record exists; never scheduled again
    Done,

    /// Only non-benign failures exist; the next repair phase picks it up
    RetryEligible,

    /// No record exists yet
    Unattempted,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::RetryEligible => "retry-eligible",
            Self::Unattempted => "unattempted",
        }
    }

    /// Returns true if the expand phase should schedule this unit
    pub fn needs_work(&self) -> bool {
        !matches!(self, Self::Done)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
