use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// Credentials are not required here: they may still arrive from the command
/// line. The harvester refuses to start without them.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is stamped into every failure report so runs can be matched to
/// the configuration that produced them.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use crate::state::FailureReason;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const BOOK_CONFIG: &str = r#"
[proxy]
api-keys = ["fc-one", "fc-two"]

[harvest]
concurrency = 2
batch-delay-ms = 3000

[output]
checkpoint-path = "./shamela_book_1681.jsonl"
report-path = "./failure_report_1681.json"
debug-dir = "./debug_html_1681"

[target]
kind = "book"
book-id = 1681
start-page = 10
end-page = 11207
"#;

    #[test]
    fn test_load_book_config() {
        let file = create_temp_config(BOOK_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.proxy.api_keys, vec!["fc-one", "fc-two"]);
        assert_eq!(config.proxy.timeout_secs, 120);
        assert!(config.proxy.render_full_page);
        assert_eq!(config.harvest.max_attempts, 3);
        assert_eq!(config.retry.cap_ms, 45000);
        assert_eq!(config.retry.quota_codes, vec![402]);
        assert_eq!(
            config.retry.challenge_exhausted_reason,
            FailureReason::ProxyFailure
        );
        match config.target {
            TargetConfig::Book {
                book_id,
                start_page,
                end_page,
                ref base_url,
            } => {
                assert_eq!(book_id, 1681);
                assert_eq!(start_page, 10);
                assert_eq!(end_page, 11207);
                assert_eq!(base_url, "https://shamela.ws");
            }
            _ => panic!("expected a book target"),
        }
    }

    #[test]
    fn test_load_narrator_config_without_keys() {
        let file = create_temp_config(
            r#"
[proxy]

[retry]
challenge-exhausted-reason = "challenge_page"

[output]
checkpoint-path = "./shamela_narrators.jsonl"
report-path = "./narrator_report.json"

[target]
kind = "narrators"
source-log = "./shamela_book_1681.jsonl"
ids = ["12"]
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert!(config.proxy.api_keys.is_empty());
        assert_eq!(
            config.retry.challenge_exhausted_reason,
            FailureReason::ChallengePage
        );
        assert!(matches!(config.target, TargetConfig::Narrators { .. }));
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config(&BOOK_CONFIG.replace("concurrency = 2", "concurrency = 0"));
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_config_hash_is_stable() {
        let file = create_temp_config(BOOK_CONFIG);
        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);

        let other = create_temp_config("different");
        assert_ne!(hash1, compute_config_hash(other.path()).unwrap());
    }
}
