/// Failure taxonomy for harvest attempts
///
/// Every failed attempt record carries exactly one of these reasons. The set is
/// closed: downstream consumers and repair phases match on it exhaustively.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an attempt did not produce a usable record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Transport or proxy error that was not retryable, or ran out of attempts
    #[serde(alias = "api_failure")]
    ProxyFailure,

    /// Every credential in the pool reported its quota spent
    QuotaExhausted,

    /// Proxy returned no markup, or implausibly little of it
    #[serde(alias = "empty_html")]
    EmptyResponse,

    /// Anti-bot interstitial was served instead of the target page
    ChallengePage,

    /// Markup had no extractable blocks
    #[serde(alias = "no_hadith_blocks")]
    NoStructuralContent,

    /// Blocks were extracted but none reference a target entity
    #[serde(alias = "no_narrators")]
    NoTargetEntities,

    /// Anything that escaped classification (panics, internal errors)
    UnexpectedError,
}

impl FailureReason {
    /// Returns true for a legitimate "nothing here" conclusion.
    ///
    /// A unit with a benign terminal record is done forever and is never
    /// revisited by a repair phase.
    pub fn is_benign_terminal(&self) -> bool {
        matches!(self, Self::NoTargetEntities)
    }

    /// Returns true if a later run should try the unit again
    pub fn is_retry_eligible(&self) -> bool {
        !self.is_benign_terminal()
    }

    /// Wire name used in checkpoint lines and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProxyFailure => "proxy_failure",
            Self::QuotaExhausted => "quota_exhausted",
            Self::EmptyResponse => "empty_response",
            Self::ChallengePage => "challenge_page",
            Self::NoStructuralContent => "no_structural_content",
            Self::NoTargetEntities => "no_target_entities",
            Self::UnexpectedError => "unexpected_error",
        }
    }

    /// Parses a wire name, accepting the older reason names found in existing logs
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "proxy_failure" | "api_failure" => Some(Self::ProxyFailure),
            "quota_exhausted" => Some(Self::QuotaExhausted),
            "empty_response" | "empty_html" => Some(Self::EmptyResponse),
            "challenge_page" => Some(Self::ChallengePage),
            "no_structural_content" | "no_hadith_blocks" => Some(Self::NoStructuralContent),
            "no_target_entities" | "no_narrators" => Some(Self::NoTargetEntities),
            "unexpected_error" => Some(Self::UnexpectedError),
            _ => None,
        }
    }

    /// All reasons in report order
    pub fn all() -> [FailureReason; 7] {
        [
            Self::ProxyFailure,
            Self::QuotaExhausted,
            Self::EmptyResponse,
            Self::ChallengePage,
            Self::NoStructuralContent,
            Self::NoTargetEntities,
            Self::UnexpectedError,
        ]
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_no_target_entities_is_benign() {
        for reason in FailureReason::all() {
            assert_eq!(
                reason.is_benign_terminal(),
                reason == FailureReason::NoTargetEntities,
                "unexpected benign flag for {}",
                reason
            );
            assert_eq!(reason.is_retry_eligible(), !reason.is_benign_terminal());
        }
    }

    #[test]
    fn test_wire_names_match_serde() {
        for reason in FailureReason::all() {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
            assert_eq!(FailureReason::from_wire(reason.as_str()), Some(reason));
        }
    }

    #[test]
    fn test_legacy_names() {
        let legacy: FailureReason = serde_json::from_str("\"no_narrators\"").unwrap();
        assert_eq!(legacy, FailureReason::NoTargetEntities);

        let legacy: FailureReason = serde_json::from_str("\"api_failure\"").unwrap();
        assert_eq!(legacy, FailureReason::ProxyFailure);

        assert_eq!(
            FailureReason::from_wire("no_hadith_blocks"),
            Some(FailureReason::NoStructuralContent)
        );
        assert_eq!(FailureReason::from_wire("bogus"), None);
    }
}
