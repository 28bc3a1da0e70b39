//! Crawler module for fetching and checkpointing work units
//!
//! This module contains the core harvesting logic, including:
//! - Scrape requests through the proxy
//! - Outcome classification into the failure taxonomy
//! - Retry with tiered backoff and credential rotation
//! - Content extraction for book pages and narrator profiles
//! - Overall two-phase run coordination

mod classifier;
mod coordinator;
mod credentials;
mod fetcher;
mod parser;
mod retry;

pub use classifier::{ClassifierRules, Failure, Verdict};
pub use coordinator::{run_harvest, Coordinator, HarvestPlan, HarvestSession, UnitOutcome};
pub use credentials::{Credential, CredentialPool, Rotation};
pub use fetcher::{build_http_client, ProxyClient, ProxyReply, ScrapeResponse};
pub use parser::{
    narrator_id_from_href, normalize_whitespace, BookPageExtractor, ContentExtractor,
    ExtractedContent, NarratorProfileExtractor,
};
pub use retry::{Backoff, BackoffTier, Outcome, RetryPolicy};

use crate::config::Config;
use crate::output::RunStatistics;
use crate::HarvestError;

/// Runs a complete harvest operation
///
/// This is the main entry point for a run. It will:
/// 1. Resolve the target and open the checkpoint log
/// 2. Build the proxy client and credential pool
/// 3. Repair retry-eligible units, compacting their stale records first
/// 4. Expand into requested units not yet done
/// 5. Write the failure report
///
/// # Arguments
///
/// * `config` - The harvest configuration, credentials already merged
/// * `config_hash` - Hash of the config file, stamped into the report
///
/// # Returns
///
/// * `Ok(RunStatistics)` - Run finished (possibly halted early)
/// * `Err(HarvestError)` - Fail-fast configuration problem or checkpoint I/O failure
pub async fn harvest(
    config: Config,
    config_hash: Option<String>,
) -> Result<RunStatistics, HarvestError> {
    run_harvest(config, config_hash).await
}
