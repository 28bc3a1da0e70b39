//! Sanad-Harvest main entry point
//!
//! This is the command-line interface for the resumable proxy harvester.

use anyhow::Context;
use clap::Parser;
use sanad_harvest::checkpoint::reduce_log;
use sanad_harvest::config::{load_config_with_hash, validate_credentials, Config};
use sanad_harvest::crawler::{harvest, HarvestPlan};
use sanad_harvest::output::{print_audit, print_log_statistics, print_statistics, CoverageAudit};
use sanad_harvest::HarvestTarget;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// How many missing unit ids `--audit` lists
const AUDIT_SAMPLE: usize = 20;

/// Sanad-Harvest: a resumable harvester for paged archives
///
/// Fetches book pages or narrator profiles through a scraping proxy and
/// records every attempt in an append-only checkpoint log. Each run repairs
/// earlier failures first, then expands into units never attempted.
#[derive(Parser, Debug)]
#[command(name = "sanad-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable proxy harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Proxy API keys in rotation order; replaces the keys in the config file
    #[arg(long = "api-key", env = "HARVEST_API_KEYS", value_delimiter = ',', hide_env_values = true)]
    api_keys: Vec<String>,

    /// Validate config and show what each phase would schedule
    #[arg(long, conflicts_with_all = ["stats", "audit"])]
    dry_run: bool,

    /// Show checkpoint statistics for the target and exit
    #[arg(long, conflicts_with_all = ["dry_run", "audit"])]
    stats: bool,

    /// Audit checkpoint coverage of the target and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    audit: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e).context("invalid configuration");
        }
    };

    let cli_keys: Vec<String> = cli
        .api_keys
        .into_iter()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .collect();
    if !cli_keys.is_empty() {
        tracing::info!("Using {} API key(s) from the command line", cli_keys.len());
        config.proxy.api_keys = cli_keys;
    }

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.audit {
        handle_audit(&config)?;
    } else {
        handle_harvest(config, config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sanad_harvest=info,warn"),
            1 => EnvFilter::new("sanad_harvest=debug,info"),
            2 => EnvFilter::new("sanad_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the schedule
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let target = HarvestTarget::from_config(&config.target)?;
    let reduction = reduce_log(&config.output.checkpoint_path)?;
    let plan = HarvestPlan::from_reduction(&target, &reduction);

    println!("=== Sanad-Harvest Dry Run ===\n");

    println!("Proxy:");
    println!("  Endpoint: {}", config.proxy.endpoint);
    println!("  API keys: {}", config.proxy.api_keys.len());
    println!("  Timeout: {}s", config.proxy.timeout_secs);
    println!("  Full page render: {}", config.proxy.render_full_page);

    println!("\nHarvest:");
    println!("  Concurrency: {}", config.harvest.concurrency);
    println!("  Batch delay: {}ms", config.harvest.batch_delay_ms);
    println!("  Max attempts: {}", config.harvest.max_attempts);
    println!(
        "  Backoff: base {}ms, cap {}ms",
        config.retry.base_ms, config.retry.cap_ms
    );

    println!("\nOutput:");
    println!("  Checkpoint log: {}", config.output.checkpoint_path.display());
    println!("  Failure report: {}", config.output.report_path.display());
    if let Some(dir) = &config.output.debug_dir {
        println!("  Debug snippets: {}", dir.display());
    }

    println!("\nTarget: {} ({} units)", target.scope(), target.len());
    println!("  Repair phase would schedule: {}", plan.repair.len());
    println!("  Expand phase would schedule: {}", plan.expand.len());

    println!("\n✓ Configuration is valid");
    match validate_credentials(&config.proxy.api_keys) {
        Ok(()) => println!("✓ Credentials present"),
        Err(e) => println!("✗ {}", e),
    }

    Ok(())
}

/// Handles the --stats mode: shows reduced checkpoint state
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let target = HarvestTarget::from_config(&config.target)?;
    let reduction = reduce_log(&config.output.checkpoint_path).with_context(|| {
        format!(
            "failed to read checkpoint log {}",
            config.output.checkpoint_path.display()
        )
    })?;

    println!("Checkpoint log: {}\n", config.output.checkpoint_path.display());
    print_log_statistics(&reduction, &target);

    Ok(())
}

/// Handles the --audit mode: checks coverage of the configured target
fn handle_audit(config: &Config) -> anyhow::Result<()> {
    let target = HarvestTarget::from_config(&config.target)?;
    let reduction = reduce_log(&config.output.checkpoint_path)?;

    let audit = CoverageAudit::run(&target, &reduction, AUDIT_SAMPLE);
    print_audit(&audit);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, config_hash: String) -> anyhow::Result<()> {
    validate_credentials(&config.proxy.api_keys)?;

    let report_path = config.output.report_path.clone();
    match harvest(config, Some(config_hash)).await {
        Ok(stats) => {
            print_statistics(&stats, &report_path);
            if let Some(cause) = &stats.halt_cause {
                tracing::warn!("Harvest halted early: {}", cause);
            } else {
                tracing::info!("Harvest completed");
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
