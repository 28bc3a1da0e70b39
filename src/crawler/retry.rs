//! Backoff and the retry combinator shared by every unit kind
//!
//! Delays grow linearly with the attempt index and are capped:
//! `delay(attempt) = min(cap, base * (attempt + 1) + jitter)`, with jitter
//! drawn uniformly from `0..=jitter-ms`. Each tier has its own base.

use crate::config::{HarvestConfig, RetryConfig};
use crate::crawler::classifier::{Failure, Verdict};
use crate::crawler::parser::ExtractedContent;
use crate::state::FailureReason;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Which backoff base a retryable condition uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackoffTier {
    /// Timeouts, connection errors, generic proxy 5xx, content not loaded
    Transport,
    /// 429 and friends
    RateLimited,
    /// The upstream target answered with a retryable status
    Upstream,
    /// Anti-bot interstitial
    Challenge,
}

/// Capped linear backoff with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    rate_limit_base_ms: u64,
    upstream_base_ms: u64,
    challenge_base_ms: u64,
    cap_ms: u64,
    jitter_ms: u64,
}

impl Backoff {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_ms: config.base_ms,
            rate_limit_base_ms: config.rate_limit_base_ms,
            upstream_base_ms: config.upstream_base_ms,
            challenge_base_ms: config.challenge_base_ms,
            cap_ms: config.cap_ms,
            jitter_ms: config.jitter_ms,
        }
    }

    pub fn base_ms(&self, tier: BackoffTier) -> u64 {
        match tier {
            BackoffTier::Transport => self.base_ms,
            BackoffTier::RateLimited => self.rate_limit_base_ms,
            BackoffTier::Upstream => self.upstream_base_ms,
            BackoffTier::Challenge => self.challenge_base_ms,
        }
    }

    /// Delay before the retry that follows `attempt` (0-based)
    pub fn delay(&self, tier: BackoffTier, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.linear_ms(tier, attempt).saturating_add(jitter).min(self.cap_ms))
    }

    /// Expected delay in milliseconds, averaging over the jitter
    pub fn expected_delay_ms(&self, tier: BackoffTier, attempt: u32) -> f64 {
        let linear = self.linear_ms(tier, attempt) as f64;
        let cap = self.cap_ms as f64;
        let jitter = self.jitter_ms as f64;

        if linear >= cap {
            return cap;
        }
        if jitter == 0.0 || linear + jitter <= cap {
            return linear + jitter / 2.0;
        }

        // Part of the jitter range is clipped at the cap
        let below_cap = cap - linear;
        (linear * below_cap + below_cap * below_cap / 2.0 + (jitter - below_cap) * cap) / jitter
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }

    fn linear_ms(&self, tier: BackoffTier, attempt: u32) -> u64 {
        self.base_ms(tier)
            .saturating_mul(u64::from(attempt).saturating_add(1))
    }
}

/// Final result of one fetch cycle for a unit
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(ExtractedContent),
    Failure(Failure),
    /// The credential used for the cycle has no quota left
    QuotaExhausted(String),
}

/// Attempt budget plus backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(harvest: &HarvestConfig, retry: &RetryConfig) -> Self {
        Self::new(harvest.max_attempts, Backoff::from_config(retry))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Runs `attempt_fn` until it yields a terminal verdict or the budget runs out
    ///
    /// Proxy-level, upstream-status and content-level retries all draw on the
    /// same budget. When the budget is spent on a retryable verdict, the
    /// verdict's own reason becomes the terminal reason.
    ///
    /// # Arguments
    ///
    /// * `label` - Unit description used in log lines
    /// * `attempt_fn` - One fetch plus classification, given the 0-based attempt index
    pub async fn run<F, Fut>(&self, label: &str, mut attempt_fn: F) -> Outcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Verdict>,
    {
        let mut attempt = 0;
        loop {
            tracing::debug!(
                "{}: attempt {}/{}",
                label,
                attempt + 1,
                self.max_attempts
            );

            match attempt_fn(attempt).await {
                Verdict::Success(content) => return Outcome::Success(content),
                Verdict::Fail(failure) => return Outcome::Failure(failure),
                Verdict::QuotaExhausted(message) => return Outcome::QuotaExhausted(message),
                Verdict::Retry {
                    tier,
                    reason,
                    message,
                    snippet,
                } => {
                    if attempt + 1 >= self.max_attempts {
                        return Outcome::Failure(Failure {
                            reason,
                            message: format!("{} after {} attempts", message, self.max_attempts),
                            snippet,
                        });
                    }

                    let delay = self.backoff.delay(tier, attempt);
                    tracing::warn!(
                        "{}: {}; retrying in {:.1}s",
                        label,
                        message,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Outcome {
    /// Reason recorded for this outcome, `None` on success
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure.reason),
            Self::QuotaExhausted(_) => Some(FailureReason::QuotaExhausted),
        }
    }
}
