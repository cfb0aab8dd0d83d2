use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

pub const DATABASE_PATH_ENV: &str = "STOREGEN_DATABASE_PATH";
pub const WORKER_COUNT_ENV: &str = "STOREGEN_WORKER_COUNT";

const MAX_WORKERS: usize = 64;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses, applies environment overrides and validates.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Configuration from defaults and environment only, for running without a file.
pub fn config_from_env() -> Result<Config, ConfigError> {
    let mut config = Config::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(DATABASE_PATH_ENV).filter(|p| !p.trim().is_empty()) {
        config.database_path = Some(PathBuf::from(path.trim()));
    }

    if let Some(count) = lookup(WORKER_COUNT_ENV) {
        config.worker_count = count.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: WORKER_COUNT_ENV,
            value: count.clone(),
        })?;
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.worker_count == 0 || config.worker_count > MAX_WORKERS {
        return Err(ConfigError::Validation {
            message: format!(
                "workerCount must be between 1 and {}, got {}",
                MAX_WORKERS, config.worker_count
            ),
        });
    }

    let queue = &config.queue;
    if queue.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "queue.maxAttempts must be at least 1".to_string(),
        });
    }
    if queue.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "queue.pollIntervalMs must be positive".to_string(),
        });
    }
    if queue.lease_ms < 1000 {
        return Err(ConfigError::Validation {
            message: format!("queue.leaseMs must be at least 1000, got {}", queue.lease_ms),
        });
    }

    if config.shopify.api_version.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "shopify.apiVersion must not be empty".to_string(),
        });
    }
    if config.ai.model.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "ai.model must not be empty".to_string(),
        });
    }
    if !config.ai.api_key_source().is_configured() {
        return Err(ConfigError::Validation {
            message: "ai needs one of apiKey, apiKeyFile or apiKeyEnvVar".to_string(),
        });
    }
    if let Some(base_url) = &config.ai.base_url {
        reqwest::Url::parse(base_url).map_err(|e| ConfigError::Validation {
            message: format!("ai.baseUrl '{}' is not a valid URL: {}", base_url, e),
        })?;
    }

    for (name, timeout) in [
        ("scraper.timeoutSecs", config.scraper.timeout_secs),
        ("shopify.timeoutSecs", config.shopify.timeout_secs),
        ("ai.timeoutSecs", config.ai.timeout_secs),
    ] {
        if timeout == 0 || timeout.saturating_mul(1000) >= queue.lease_ms {
            return Err(ConfigError::Validation {
                message: format!(
                    "{} must be positive and shorter than queue.leaseMs ({} ms), got {}",
                    name, queue.lease_ms, timeout
                ),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(json: &str) -> Result<Config, ConfigError> {
        let mut config: Config = serde_json::from_str(json)?;
        apply_env_overrides(&mut config, |_| None)?;
        validate_config(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse("{}").unwrap();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.backoff_base_ms, 5000);
        assert_eq!(config.queue.keep_completed, 100);
        assert_eq!(config.shopify.api_version, "2024-01");
        assert_eq!(
            config.ai.api_key_env_var.as_deref(),
            Some("OPENAI_API_KEY")
        );
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_camel_case_fields() {
        let config = parse(
            r#"{
                "databasePath": "/var/lib/storegen/jobs.db",
                "workerCount": 4,
                "queue": { "maxAttempts": 5, "backoffBaseMs": 1000, "pollIntervalMs": 250 },
                "ai": { "model": "gpt-4o", "apiKeyFile": "/run/secrets/openai" }
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/storegen/jobs.db"))
        );
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.queue.retry_policy().max_attempts, 5);
        assert_eq!(config.queue.poll_interval().as_millis(), 250);
        assert_eq!(config.queue.lease_ms, 600_000);
        assert_eq!(config.ai.model, "gpt-4o");
        assert_eq!(
            config.ai.api_key_source().file,
            Some("/run/secrets/openai")
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (DATABASE_PATH_ENV, "/tmp/override.db"),
            (WORKER_COUNT_ENV, " 8 "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |name| env.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/override.db")));
        assert_eq!(config.worker_count, 8);
    }

    #[test]
    fn test_invalid_worker_count_env() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, |name| {
            (name == WORKER_COUNT_ENV).then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_validation_errors() {
        assert!(parse(r#"{"workerCount": 0}"#).is_err());
        assert!(parse(r#"{"queue": {"maxAttempts": 0}}"#).is_err());
        assert!(parse(r#"{"queue": {"leaseMs": 10}}"#).is_err());
        assert!(parse(r#"{"ai": {"baseUrl": "not a url"}}"#).is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(parse("{"), Err(ConfigError::ParseJson(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/storegen.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
