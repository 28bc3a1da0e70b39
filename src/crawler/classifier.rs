//! Outcome classification
//!
//! Maps one proxy reply to a verdict: success, a retryable condition with the
//! backoff tier it should use, a terminal failure, or a quota signal. Pure:
//! no I/O, no sleeping, no logging of outcomes.

use crate::config::{HarvestConfig, RetryConfig};
use crate::crawler::fetcher::ProxyReply;
use crate::crawler::parser::{ContentExtractor, ExtractedContent};
use crate::crawler::retry::BackoffTier;
use crate::state::FailureReason;
use std::collections::HashSet;

/// A terminal failure with its diagnostic message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub reason: FailureReason,
    pub message: String,

    /// Leading markup, kept for the debug directory
    pub snippet: Option<String>,
}

impl Failure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            snippet: None,
        }
    }

    fn with_snippet(mut self, snippet: String) -> Self {
        self.snippet = Some(snippet);
        self
    }
}

/// Classification of a single attempt
#[derive(Debug, Clone)]
pub enum Verdict {
    Success(ExtractedContent),

    /// Worth another attempt; `reason` is recorded if the budget runs out
    Retry {
        tier: BackoffTier,
        reason: FailureReason,
        message: String,
        snippet: Option<String>,
    },

    Fail(Failure),

    /// The credential's quota is spent
    QuotaExhausted(String),
}

/// Status sets, markers and thresholds used to classify replies
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    proxy_retryable: HashSet<u16>,
    upstream_retryable: HashSet<u16>,
    rate_limit: HashSet<u16>,
    quota: HashSet<u16>,
    challenge_markers: Vec<String>,
    challenge_exhausted_reason: FailureReason,
    min_markup_len: usize,
    snippet_len: usize,
}

impl ClassifierRules {
    pub fn from_config(harvest: &HarvestConfig, retry: &RetryConfig) -> Self {
        Self {
            proxy_retryable: retry.proxy_retryable_codes.iter().copied().collect(),
            upstream_retryable: retry.upstream_retryable_codes.iter().copied().collect(),
            rate_limit: retry.rate_limit_codes.iter().copied().collect(),
            quota: retry.quota_codes.iter().copied().collect(),
            challenge_markers: retry
                .challenge_markers
                .iter()
                .map(|marker| marker.to_lowercase())
                .collect(),
            challenge_exhausted_reason: retry.challenge_exhausted_reason,
            min_markup_len: harvest.min_markup_len,
            snippet_len: harvest.snippet_len,
        }
    }

    /// Classifies one proxy reply
    ///
    /// # Order of checks
    ///
    /// | Condition | Verdict |
    /// |-----------|---------|
    /// | Transport error or unreadable envelope | Retry (transport) |
    /// | Proxy status in quota set | QuotaExhausted |
    /// | Proxy status in retryable set | Retry (rate-limit or transport) |
    /// | Other non-2xx proxy status | `proxy_failure` |
    /// | Envelope reports failure naming a retryable condition | Retry |
    /// | Envelope reports any other failure | `proxy_failure` |
    /// | Upstream status in retryable set | Retry (rate-limit or upstream) |
    /// | Markup shorter than the minimum | `empty_response` |
    /// | Challenge marker in markup | Retry (challenge) |
    /// | No blocks, no structural indicators | Retry (content not loaded) |
    /// | No blocks, some indicator present | `no_structural_content` |
    /// | Blocks but no target entities | `no_target_entities` |
    /// | Otherwise | Success |
    pub fn classify(
        &self,
        reply: &ProxyReply,
        extractor: &dyn ContentExtractor,
        url: &str,
    ) -> Verdict {
        let envelope = match reply {
            ProxyReply::Transport(message) => {
                return Verdict::Retry {
                    tier: BackoffTier::Transport,
                    reason: FailureReason::ProxyFailure,
                    message: message.clone(),
                    snippet: None,
                };
            }
            ProxyReply::Status { code, .. } => return self.classify_proxy_status(*code),
            ProxyReply::Envelope(envelope) => envelope,
        };

        if !envelope.success {
            return self.classify_envelope_error(&envelope.error_message());
        }

        let markup = envelope.html();

        if let Some(status) = envelope.target_status() {
            if self.upstream_retryable.contains(&status) {
                let tier = if self.rate_limit.contains(&status) {
                    BackoffTier::RateLimited
                } else {
                    BackoffTier::Upstream
                };
                return Verdict::Retry {
                    tier,
                    reason: FailureReason::ProxyFailure,
                    message: format!("Target status {}", status),
                    snippet: Some(self.snippet(markup)),
                };
            }
        }

        if markup.chars().count() < self.min_markup_len {
            return Verdict::Fail(
                Failure::new(
                    FailureReason::EmptyResponse,
                    format!("Empty markup ({} chars)", markup.chars().count()),
                )
                .with_snippet(self.snippet(markup)),
            );
        }

        if self.is_challenge(markup) {
            return Verdict::Retry {
                tier: BackoffTier::Challenge,
                reason: self.challenge_exhausted_reason,
                message: "Challenge page received".to_string(),
                snippet: Some(self.snippet(markup)),
            };
        }

        let content = extractor.extract(markup, url);

        if content.block_count == 0 {
            let indicators = content.describe_indicators();
            if content.indicators.iter().all(|(_, count)| *count == 0) {
                return Verdict::Retry {
                    tier: BackoffTier::Transport,
                    reason: FailureReason::NoStructuralContent,
                    message: format!("Content not loaded ({})", indicators),
                    snippet: Some(self.snippet(markup)),
                };
            }
            return Verdict::Fail(
                Failure::new(
                    FailureReason::NoStructuralContent,
                    format!("No structural blocks ({})", indicators),
                )
                .with_snippet(self.snippet(markup)),
            );
        }

        if content.entity_count == 0 {
            return Verdict::Fail(
                Failure::new(FailureReason::NoTargetEntities, content.summary.clone())
                    .with_snippet(self.snippet(markup)),
            );
        }

        Verdict::Success(content)
    }

    /// Case-insensitive substring match against the challenge markers
    pub fn is_challenge(&self, markup: &str) -> bool {
        let lowered = markup.to_lowercase();
        self.challenge_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
    }

    /// Leading characters of the markup
    pub fn snippet(&self, markup: &str) -> String {
        markup.chars().take(self.snippet_len).collect()
    }

    fn classify_proxy_status(&self, code: u16) -> Verdict {
        let message = format!("Proxy HTTP {}", code);

        if self.quota.contains(&code) {
            return Verdict::QuotaExhausted(message);
        }

        if self.proxy_retryable.contains(&code) {
            let tier = if self.rate_limit.contains(&code) {
                BackoffTier::RateLimited
            } else {
                BackoffTier::Transport
            };
            return Verdict::Retry {
                tier,
                reason: FailureReason::ProxyFailure,
                message,
                snippet: None,
            };
        }

        Verdict::Fail(Failure::new(FailureReason::ProxyFailure, message))
    }

    /// The proxy answered 2xx but its envelope reports failure
    fn classify_envelope_error(&self, error: &str) -> Verdict {
        let message = format!("Proxy failed: {}", error);
        let mentions = |codes: &HashSet<u16>| codes.iter().any(|code| error.contains(&code.to_string()));

        let retryable = error.to_lowercase().contains("timeout") || mentions(&self.upstream_retryable);
        if !retryable {
            return Verdict::Fail(Failure::new(FailureReason::ProxyFailure, message));
        }

        let tier = if mentions(&self.rate_limit) {
            BackoffTier::RateLimited
        } else {
            BackoffTier::Transport
        };
        Verdict::Retry {
            tier,
            reason: FailureReason::ProxyFailure,
            message,
            snippet: None,
        }
    }
}
