use serde::Deserialize;
use std::path::PathBuf;

use crate::state::FailureReason;

/// Main configuration structure for a harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub output: OutputConfig,
    pub target: TargetConfig,
}

/// Scraping proxy connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Scrape endpoint of the proxy
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Ordered API credentials; rotation only ever moves forward
    #[serde(rename = "api-keys", default)]
    pub api_keys: Vec<String>,

    /// Per-request timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Ask the proxy for the whole rendered page rather than its main content
    #[serde(rename = "render-full-page", default = "default_true")]
    pub render_full_page: bool,
}

/// Batch scheduling and attempt budget
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Units in flight per batch
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Pause between batches (milliseconds)
    #[serde(rename = "batch-delay-ms", default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Attempts per unit before a retryable condition becomes terminal
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Markup shorter than this is treated as empty
    #[serde(rename = "min-markup-len", default = "default_min_markup_len")]
    pub min_markup_len: usize,

    /// Characters of markup kept for diagnostics
    #[serde(rename = "snippet-len", default = "default_snippet_len")]
    pub snippet_len: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_delay_ms: default_batch_delay_ms(),
            max_attempts: default_max_attempts(),
            min_markup_len: default_min_markup_len(),
            snippet_len: default_snippet_len(),
        }
    }
}

/// Backoff tiers and retryable status sets
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Base delay for transport errors and generic 5xx (milliseconds)
    #[serde(rename = "base-ms", default = "default_base_ms")]
    pub base_ms: u64,

    /// Base delay for rate-limit-class statuses
    #[serde(rename = "rate-limit-base-ms", default = "default_rate_limit_base_ms")]
    pub rate_limit_base_ms: u64,

    /// Base delay when the upstream target itself answered with a retryable status
    #[serde(rename = "upstream-base-ms", default = "default_upstream_base_ms")]
    pub upstream_base_ms: u64,

    /// Base delay after an anti-bot interstitial
    #[serde(rename = "challenge-base-ms", default = "default_challenge_base_ms")]
    pub challenge_base_ms: u64,

    /// Upper bound on any single delay
    #[serde(rename = "cap-ms", default = "default_cap_ms")]
    pub cap_ms: u64,

    /// Jitter drawn uniformly from `0..=jitter-ms`
    #[serde(rename = "jitter-ms", default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Proxy HTTP statuses that are retried
    #[serde(
        rename = "proxy-retryable-codes",
        default = "default_proxy_retryable_codes"
    )]
    pub proxy_retryable_codes: Vec<u16>,

    /// Upstream target statuses (from response metadata) that are retried
    #[serde(
        rename = "upstream-retryable-codes",
        default = "default_upstream_retryable_codes"
    )]
    pub upstream_retryable_codes: Vec<u16>,

    /// Statuses that use the rate-limit backoff base
    #[serde(rename = "rate-limit-codes", default = "default_rate_limit_codes")]
    pub rate_limit_codes: Vec<u16>,

    /// Statuses meaning the current credential's quota is spent
    #[serde(rename = "quota-codes", default = "default_quota_codes")]
    pub quota_codes: Vec<u16>,

    /// Case-insensitive substrings identifying an anti-bot interstitial
    #[serde(rename = "challenge-markers", default = "default_challenge_markers")]
    pub challenge_markers: Vec<String>,

    /// Reason recorded when interstitials persist through the whole budget
    #[serde(
        rename = "challenge-exhausted-reason",
        default = "default_challenge_exhausted_reason"
    )]
    pub challenge_exhausted_reason: FailureReason,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            rate_limit_base_ms: default_rate_limit_base_ms(),
            upstream_base_ms: default_upstream_base_ms(),
            challenge_base_ms: default_challenge_base_ms(),
            cap_ms: default_cap_ms(),
            jitter_ms: default_jitter_ms(),
            proxy_retryable_codes: default_proxy_retryable_codes(),
            upstream_retryable_codes: default_upstream_retryable_codes(),
            rate_limit_codes: default_rate_limit_codes(),
            quota_codes: default_quota_codes(),
            challenge_markers: default_challenge_markers(),
            challenge_exhausted_reason: default_challenge_exhausted_reason(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the checkpoint log (JSON Lines)
    #[serde(rename = "checkpoint-path")]
    pub checkpoint_path: PathBuf,

    /// Path to the failure report written at the end of each run
    #[serde(rename = "report-path")]
    pub report_path: PathBuf,

    /// Directory for markup snippets of failed attempts
    #[serde(rename = "debug-dir", default)]
    pub debug_dir: Option<PathBuf>,
}

/// What to harvest
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetConfig {
    /// An inclusive page range of one book
    Book {
        #[serde(rename = "book-id")]
        book_id: u64,
        #[serde(rename = "start-page")]
        start_page: u64,
        #[serde(rename = "end-page")]
        end_page: u64,
        #[serde(rename = "base-url", default = "default_base_url")]
        base_url: String,
    },

    /// A set of narrator profiles
    Narrators {
        #[serde(rename = "base-url", default = "default_base_url")]
        base_url: String,
        #[serde(default)]
        ids: Vec<String>,
        /// Book checkpoint log whose success lines name narrators
        #[serde(rename = "source-log", default)]
        source_log: Option<PathBuf>,
    },
}

fn default_endpoint() -> String {
    "https://api.firecrawl.dev/v2/scrape".to_string()
}

fn default_base_url() -> String {
    "https://shamela.ws".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> u32 {
    2
}

fn default_batch_delay_ms() -> u64 {
    3000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_markup_len() -> usize {
    100
}

fn default_snippet_len() -> usize {
    500
}

fn default_base_ms() -> u64 {
    5000
}

fn default_rate_limit_base_ms() -> u64 {
    15000
}

fn default_upstream_base_ms() -> u64 {
    6000
}

fn default_challenge_base_ms() -> u64 {
    10000
}

fn default_cap_ms() -> u64 {
    45000
}

fn default_jitter_ms() -> u64 {
    1500
}

fn default_proxy_retryable_codes() -> Vec<u16> {
    vec![408, 409, 425, 429, 500, 502, 503, 504]
}

fn default_upstream_retryable_codes() -> Vec<u16> {
    vec![
        408, 409, 423, 425, 429, 500, 502, 503, 504, 520, 521, 522, 523, 524, 525, 526, 530,
    ]
}

fn default_rate_limit_codes() -> Vec<u16> {
    vec![429]
}

fn default_quota_codes() -> Vec<u16> {
    vec![402]
}

fn default_challenge_markers() -> Vec<String> {
    [
        "cf-browser-verification",
        "challenge-platform",
        "just a moment",
        "checking your browser",
        "id=\"cf-wrapper\"",
        "id=\"cf-error-details\"",
        "error code 520",
        "error code 522",
        "cloudflare",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_challenge_exhausted_reason() -> FailureReason {
    FailureReason::ProxyFailure
}
