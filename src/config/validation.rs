use crate::config::types::{
    Config, HarvestConfig, OutputConfig, ProxyConfig, RetryConfig, TargetConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_proxy_config(&config.proxy)?;
    validate_harvest_config(&config.harvest)?;
    validate_retry_config(&config.retry)?;
    validate_output_config(&config.output)?;
    validate_target_config(&config.target)?;
    Ok(())
}

/// Validates a resolved credential list
///
/// Called once the command line and environment have had their say, before
/// any unit is scheduled.
pub fn validate_credentials(keys: &[String]) -> Result<(), ConfigError> {
    if keys.iter().all(|key| key.trim().is_empty()) {
        return Err(ConfigError::NoCredentials);
    }
    Ok(())
}

/// Validates proxy configuration
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    let endpoint = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint: {}", e)))?;

    if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "endpoint must use http or https, got '{}'",
            endpoint.scheme()
        )));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates batch scheduling configuration
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 32 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 32, got {}",
            config.concurrency
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.snippet_len == 0 {
        return Err(ConfigError::Validation(
            "snippet-len must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates backoff tiers and status sets
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    let smallest_base = [
        config.base_ms,
        config.rate_limit_base_ms,
        config.upstream_base_ms,
        config.challenge_base_ms,
    ]
    .into_iter()
    .min()
    .unwrap_or(0);

    if config.cap_ms < smallest_base {
        return Err(ConfigError::Validation(format!(
            "cap-ms ({}) is below the smallest backoff base ({})",
            config.cap_ms, smallest_base
        )));
    }

    for code in config
        .proxy_retryable_codes
        .iter()
        .chain(&config.upstream_retryable_codes)
        .chain(&config.rate_limit_codes)
        .chain(&config.quota_codes)
    {
        if !(100..=599).contains(code) {
            return Err(ConfigError::Validation(format!(
                "{} is not an HTTP status code",
                code
            )));
        }
    }

    if let Some(code) = config
        .quota_codes
        .iter()
        .find(|code| config.proxy_retryable_codes.contains(code))
    {
        return Err(ConfigError::Validation(format!(
            "status {} cannot be both a quota code and retryable",
            code
        )));
    }

    if config.challenge_markers.iter().any(|m| m.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "challenge-markers cannot contain empty entries".to_string(),
        ));
    }

    if config.challenge_exhausted_reason.is_benign_terminal() {
        return Err(ConfigError::Validation(format!(
            "challenge-exhausted-reason cannot be '{}'",
            config.challenge_exhausted_reason
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.checkpoint_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint-path cannot be empty".to_string(),
        ));
    }

    if config.report_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "report-path cannot be empty".to_string(),
        ));
    }

    if config.checkpoint_path == config.report_path {
        return Err(ConfigError::Validation(
            "checkpoint-path and report-path must differ".to_string(),
        ));
    }

    Ok(())
}

/// Validates the harvest target
fn validate_target_config(config: &TargetConfig) -> Result<(), ConfigError> {
    match config {
        TargetConfig::Book {
            start_page,
            end_page,
            base_url,
            ..
        } => {
            validate_base_url(base_url)?;
            if start_page > end_page {
                return Err(ConfigError::Validation(format!(
                    "start-page ({}) is after end-page ({})",
                    start_page, end_page
                )));
            }
        }
        TargetConfig::Narrators {
            base_url,
            ids,
            source_log,
        } => {
            validate_base_url(base_url)?;
            if ids.is_empty() && source_log.is_none() {
                return Err(ConfigError::Validation(
                    "a narrators target needs ids, a source-log, or both".to_string(),
                ));
            }
            if let Some(id) = ids.iter().find(|id| !is_valid_narrator_id(id)) {
                return Err(ConfigError::Validation(format!(
                    "invalid narrator id '{}'",
                    id
                )));
            }
        }
    }

    Ok(())
}

fn validate_base_url(base_url: &str) -> Result<(), ConfigError> {
    let url = Url::parse(base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url '{}': {}", base_url, e)))?;

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' has no host",
            base_url
        )));
    }

    Ok(())
}

/// Narrator ids end up in URL paths and file names
fn is_valid_narrator_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
