//! Harvest coordinator - two-phase batch orchestration
//!
//! This module contains the run loop that coordinates:
//! - Repairing units left retry-eligible by earlier runs
//! - Expanding into requested units that were never finished
//! - Running each batch on concurrent tasks and persisting every outcome
//! - Halting scheduling on credential exhaustion or Ctrl+C
//! - Writing the failure report at the end of the run

use crate::checkpoint::{
    open_checkpoint, AttemptRecord, CheckpointError, CheckpointResult, CheckpointStore, Reduction,
};
use crate::config::{validate_credentials, Config};
use crate::crawler::classifier::{ClassifierRules, Failure};
use crate::crawler::credentials::{Credential, CredentialPool, Rotation};
use crate::crawler::fetcher::ProxyClient;
use crate::crawler::parser::{BookPageExtractor, ContentExtractor, NarratorProfileExtractor};
use crate::crawler::retry::{Outcome, RetryPolicy};
use crate::output::{FailureReport, Phase, RunStatistics};
use crate::state::{FailureReason, UnitStatus};
use crate::unit::{HarvestTarget, UnitKey, WorkUnit};
use crate::HarvestError;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};

const EXHAUSTED_MESSAGE: &str = "All API keys exhausted";

/// What a run would schedule, computed from the reduced log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestPlan {
    /// Retry-eligible units owned by the target, in key order
    pub repair: Vec<UnitKey>,

    /// Requested units not yet done
    ///
    /// Repair units inside the requested range appear here too: one that
    /// fails again in the repair phase gets another attempt in expand.
    pub expand: Vec<UnitKey>,
}

impl HarvestPlan {
    pub fn from_reduction(target: &HarvestTarget, reduction: &Reduction) -> Self {
        let repair: Vec<UnitKey> = reduction
            .retry_eligible()
            .into_iter()
            .filter(|key| target.owns(key))
            .collect();
        let expand = expand_keys(target, reduction);
        Self { repair, expand }
    }

    pub fn is_empty(&self) -> bool {
        self.repair.is_empty() && self.expand.is_empty()
    }
}

/// Requested keys that the reduced log does not mark done
fn expand_keys(target: &HarvestTarget, reduction: &Reduction) -> Vec<UnitKey> {
    target
        .requested_keys()
        .into_iter()
        .filter(|key| reduction.status_of(key) != UnitStatus::Done)
        .collect()
}

/// Recorded result of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub key: UnitKey,

    /// `None` on success
    pub reason: Option<FailureReason>,
    pub message: String,
}

impl UnitOutcome {
    /// Progress marker: success, benign skip, or failure
    pub fn marker(&self) -> &'static str {
        match self.reason {
            None => "✓",
            Some(reason) if reason.is_benign_terminal() => "•",
            Some(_) => "✗",
        }
    }
}

/// State shared by every worker of a run
///
/// The credential pool and the checkpoint writer are the only mutable
/// resources, each behind its own lock.
pub struct HarvestSession {
    proxy: ProxyClient,
    pool: CredentialPool,
    checkpoint: Arc<dyn CheckpointStore>,
    extractor: Box<dyn ContentExtractor>,
    rules: ClassifierRules,
    retry: RetryPolicy,
    debug_dir: Option<PathBuf>,
    halt_cause: Mutex<Option<String>>,
}

impl HarvestSession {
    /// Builds a session that parses pages with `extractor`
    ///
    /// Fails if the proxy client cannot be built or no credential is usable.
    pub fn new(
        config: &Config,
        extractor: Box<dyn ContentExtractor>,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> Result<Self, HarvestError> {
        tracing::debug!("Using {} extractor", extractor.kind());

        Ok(Self {
            proxy: ProxyClient::new(&config.proxy)?,
            pool: CredentialPool::new(config.proxy.api_keys.clone())?,
            checkpoint,
            extractor,
            rules: ClassifierRules::from_config(&config.harvest, &config.retry),
            retry: RetryPolicy::from_config(&config.harvest, &config.retry),
            debug_dir: config.output.debug_dir.clone(),
            halt_cause: Mutex::new(None),
        })
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Stops further scheduling; the first cause wins
    pub fn halt(&self, cause: impl Into<String>) {
        let mut halt_cause = self.halt_cause.lock().unwrap_or_else(PoisonError::into_inner);
        if halt_cause.is_none() {
            *halt_cause = Some(cause.into());
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halt_cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn halt_cause(&self) -> Option<String> {
        self.halt_cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetches, classifies and records one unit
    ///
    /// Only a checkpoint write failure is returned as an error; every other
    /// problem becomes a failure record.
    pub async fn harvest_unit(self: Arc<Self>, unit: WorkUnit) -> CheckpointResult<UnitOutcome> {
        let outcome = self.fetch_with_rotation(&unit).await;
        self.record(&unit, outcome)
    }

    /// Runs the retry cycle, rotating credentials on quota exhaustion
    ///
    /// After a rotation the unit gets one more full cycle on the new
    /// credential. A second quota signal is recorded as `quota_exhausted`.
    async fn fetch_with_rotation(&self, unit: &WorkUnit) -> Outcome {
        let label = unit.key.to_string();

        let Some(mut credential) = self.pool.current() else {
            self.halt(EXHAUSTED_MESSAGE);
            return Outcome::QuotaExhausted(EXHAUSTED_MESSAGE.to_string());
        };

        let mut rotated = false;
        loop {
            let message = match self.fetch_cycle(unit, &label, &credential).await {
                Outcome::QuotaExhausted(message) => message,
                other => return other,
            };

            match self.pool.report_exhausted(&credential) {
                Rotation::Rotated(next) | Rotation::Superseded(next) if !rotated => {
                    tracing::info!("{}: retrying with key {}", label, next.position() + 1);
                    credential = next;
                    rotated = true;
                }
                Rotation::Exhausted => {
                    self.halt(EXHAUSTED_MESSAGE);
                    return Outcome::QuotaExhausted(format!("{}: {}", EXHAUSTED_MESSAGE, message));
                }
                Rotation::Rotated(_) | Rotation::Superseded(_) => {
                    return Outcome::QuotaExhausted(message);
                }
            }
        }
    }

    async fn fetch_cycle(&self, unit: &WorkUnit, label: &str, credential: &Credential) -> Outcome {
        let url = unit.target_url.as_str();
        self.retry
            .run(label, move |_attempt| async move {
                let reply = self.proxy.scrape(url, credential).await;
                self.rules.classify(&reply, self.extractor.as_ref(), url)
            })
            .await
    }

    fn record(&self, unit: &WorkUnit, outcome: Outcome) -> CheckpointResult<UnitOutcome> {
        let (record, reason, message) = match outcome {
            Outcome::Success(content) => (
                AttemptRecord::success(unit, content.payload),
                None,
                content.summary,
            ),
            Outcome::Failure(failure) => {
                self.save_snippet(unit, &failure);
                (
                    AttemptRecord::failure(unit, failure.reason, &failure.message),
                    Some(failure.reason),
                    failure.message,
                )
            }
            Outcome::QuotaExhausted(message) => (
                AttemptRecord::failure(unit, FailureReason::QuotaExhausted, &message),
                Some(FailureReason::QuotaExhausted),
                message,
            ),
        };

        self.checkpoint.append(&record)?;

        Ok(UnitOutcome {
            key: unit.key.clone(),
            reason,
            message,
        })
    }

    /// Records a unit whose task died without recording anything
    pub fn record_unexpected(
        &self,
        unit: &WorkUnit,
        error: &JoinError,
    ) -> CheckpointResult<UnitOutcome> {
        let message = format!("Worker task failed: {}", error);
        self.checkpoint.append(&AttemptRecord::failure(
            unit,
            FailureReason::UnexpectedError,
            &message,
        ))?;

        Ok(UnitOutcome {
            key: unit.key.clone(),
            reason: Some(FailureReason::UnexpectedError),
            message,
        })
    }

    fn save_snippet(&self, unit: &WorkUnit, failure: &Failure) {
        let (Some(dir), Some(snippet)) = (&self.debug_dir, &failure.snippet) else {
            return;
        };

        let path = dir.join(format!(
            "{}_{}.html",
            unit.key.file_stem(),
            failure.reason.as_str()
        ));
        if let Err(e) = std::fs::write(&path, snippet) {
            tracing::warn!("Failed to save snippet {}: {}", path.display(), e);
        }
    }
}

/// Main harvest coordinator
pub struct Coordinator {
    config: Config,
    target: HarvestTarget,
    checkpoint: Arc<dyn CheckpointStore>,
    session: Arc<HarvestSession>,
    config_hash: Option<String>,
}

impl Coordinator {
    /// Creates a coordinator ready to run
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration, credentials already merged
    /// * `config_hash` - Hash stamped into the failure report, if known
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Target resolved, log opened, pool ready
    /// * `Err(HarvestError)` - No credentials, unreadable target, or unusable log
    pub fn new(config: Config, config_hash: Option<String>) -> Result<Self, HarvestError> {
        Self::build(config, config_hash, None)
    }

    /// Creates a coordinator that parses pages with a custom extractor
    pub fn with_extractor(
        config: Config,
        config_hash: Option<String>,
        extractor: Box<dyn ContentExtractor>,
    ) -> Result<Self, HarvestError> {
        Self::build(config, config_hash, Some(extractor))
    }

    fn build(
        config: Config,
        config_hash: Option<String>,
        extractor: Option<Box<dyn ContentExtractor>>,
    ) -> Result<Self, HarvestError> {
        validate_credentials(&config.proxy.api_keys)?;

        let target = HarvestTarget::from_config(&config.target)?;
        let extractor = extractor.unwrap_or_else(|| default_extractor(&target));
        let checkpoint: Arc<dyn CheckpointStore> =
            Arc::new(open_checkpoint(&config.output.checkpoint_path)?);
        let session = HarvestSession::new(&config, extractor, Arc::clone(&checkpoint))?;

        if let Some(dir) = &config.output.debug_dir {
            std::fs::create_dir_all(dir)?;
        }

        tracing::info!(
            "Harvesting {} through {} with {} key(s)",
            target.scope(),
            config.proxy.endpoint,
            session.pool().len()
        );

        Ok(Self {
            config,
            target,
            checkpoint,
            session: Arc::new(session),
            config_hash,
        })
    }

    pub fn target(&self) -> &HarvestTarget {
        &self.target
    }

    pub fn session(&self) -> &Arc<HarvestSession> {
        &self.session
    }

    /// What the next run would schedule, without fetching anything
    pub fn plan(&self) -> Result<HarvestPlan, HarvestError> {
        let reduction = self.checkpoint.reduce()?;
        Ok(HarvestPlan::from_reduction(&self.target, &reduction))
    }

    /// Runs the repair phase, then the expand phase, then writes the report
    pub async fn run(&self) -> Result<RunStatistics, HarvestError> {
        let mut stats = RunStatistics::new();

        let interrupt = self.listen_for_interrupt();
        let result = self.run_phases(&mut stats).await;
        interrupt.abort();

        stats.halt_cause = self.session.halt_cause();
        stats.finish();
        result?;

        let reduction = self.checkpoint.reduce()?;
        let report = FailureReport::build(
            &stats,
            &reduction,
            &self.target,
            self.config_hash.clone(),
        );
        report.write(&self.config.output.report_path)?;

        tracing::info!(
            "Run finished: {} attempted, {} succeeded, {} failed",
            stats.attempted,
            stats.succeeded,
            stats.failed()
        );

        Ok(stats)
    }

    async fn run_phases(&self, stats: &mut RunStatistics) -> Result<(), HarvestError> {
        let plan = self.plan()?;

        if plan.repair.is_empty() {
            tracing::info!("Repair phase: nothing to repair");
        } else {
            let stale: HashSet<UnitKey> = plan.repair.iter().cloned().collect();
            stats.compacted = self.checkpoint.compact(&stale)?;
            stats.scheduled_repair = plan.repair.len() as u64;
            tracing::info!(
                "Repair phase: {} units ({} stale failure lines compacted)",
                plan.repair.len(),
                stats.compacted
            );
            self.run_phase(Phase::Repair, &plan.repair, stats).await?;
        }

        if let Some(cause) = self.session.halt_cause() {
            tracing::warn!("Skipping expand phase: {}", cause);
            return Ok(());
        }

        let reduction = self.checkpoint.reduce()?;
        let expand = expand_keys(&self.target, &reduction);
        if expand.is_empty() {
            tracing::info!("Expand phase: all requested units are done");
            return Ok(());
        }

        stats.scheduled_expand = expand.len() as u64;
        tracing::info!("Expand phase: {} units", expand.len());
        self.run_phase(Phase::Expand, &expand, stats).await
    }

    /// Runs `keys` in fixed-size batches with a delay between batches
    async fn run_phase(
        &self,
        phase: Phase,
        keys: &[UnitKey],
        stats: &mut RunStatistics,
    ) -> Result<(), HarvestError> {
        let batch_size = self.config.harvest.concurrency.max(1) as usize;
        let batch_delay = Duration::from_millis(self.config.harvest.batch_delay_ms);
        let batches: Vec<&[UnitKey]> = keys.chunks(batch_size).collect();
        let total = keys.len();
        let mut position = 0;

        for (index, batch) in batches.iter().enumerate() {
            if let Some(cause) = self.session.halt_cause() {
                tracing::warn!(
                    "Stopping {} phase before batch {}/{}: {}",
                    phase.label(),
                    index + 1,
                    batches.len(),
                    cause
                );
                break;
            }

            let handles: Vec<(WorkUnit, JoinHandle<CheckpointResult<UnitOutcome>>)> = batch
                .iter()
                .map(|key| {
                    let unit = self.target.work_unit(key.clone());
                    let task = Arc::clone(&self.session).harvest_unit(unit.clone());
                    (unit, tokio::spawn(task))
                })
                .collect();

            let mut fatal: Option<CheckpointError> = None;
            for (unit, handle) in handles {
                position += 1;
                let recorded = match handle.await {
                    Ok(recorded) => recorded,
                    Err(e) => {
                        tracing::error!("Task for {} failed: {}", unit.key, e);
                        self.session.record_unexpected(&unit, &e)
                    }
                };

                match recorded {
                    Ok(outcome) => {
                        stats.record(phase, &outcome.key, outcome.reason);
                        log_progress(phase, position, total, &outcome);
                    }
                    Err(e) => {
                        tracing::error!("Failed to record {}: {}", unit.key, e);
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                }
            }

            if let Some(e) = fatal {
                return Err(e.into());
            }

            let is_last = index + 1 == batches.len();
            if !is_last && !batch_delay.is_zero() && !self.session.is_halted() {
                tokio::time::sleep(batch_delay).await;
            }
        }

        Ok(())
    }

    fn listen_for_interrupt(&self) -> JoinHandle<()> {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; in-flight units will finish, no new batches start");
                session.halt("Interrupted");
            }
        })
    }
}

fn default_extractor(target: &HarvestTarget) -> Box<dyn ContentExtractor> {
    match target {
        HarvestTarget::Book { .. } => Box::new(BookPageExtractor),
        HarvestTarget::Narrators { .. } => Box::new(NarratorProfileExtractor),
    }
}

fn log_progress(phase: Phase, position: usize, total: usize, outcome: &UnitOutcome) {
    let line = format!(
        "[{} {}/{}] {} {} {}",
        phase.label(),
        position,
        total,
        outcome.key,
        outcome.marker(),
        outcome.message
    );
    match outcome.reason {
        Some(reason) if !reason.is_benign_terminal() => tracing::warn!("{}", line),
        _ => tracing::info!("{}", line),
    }
}

/// Runs a complete harvest
///
/// # Example
///
/// ```no_run
/// use sanad_harvest::config::load_config;
/// use sanad_harvest::crawler::run_harvest;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("harvest.toml"))?;
/// let stats = run_harvest(config, None).await?;
/// println!("{} succeeded", stats.succeeded);
/// # Ok(())
/// # }
/// ```
pub async fn run_harvest(
    config: Config,
    config_hash: Option<String>,
) -> Result<RunStatistics, HarvestError> {
    let coordinator = Coordinator::new(config, config_hash)?;
    coordinator.run().await
}
