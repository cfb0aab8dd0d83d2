use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::{Retention, RetryPolicy};
use crate::secrets::SecretSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// SQLite database file. Defaults to `~/.storegen/data/storegen.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub shopify: ShopifyConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

fn default_worker_count() -> usize {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            worker_count: default_worker_count(),
            queue: QueueConfig::default(),
            shopify: ShopifyConfig::default(),
            scraper: ScraperConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub keep_completed: u32,
    pub keep_failed: u32,
    pub poll_interval_ms: u64,
    pub lease_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 5000,
            keep_completed: 100,
            keep_failed: 100,
            poll_interval_ms: 500,
            lease_ms: 600_000,
        }
    }
}

impl QueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_base_ms))
    }

    pub fn retention(&self) -> Retention {
        Retention {
            keep_completed: self.keep_completed,
            keep_failed: self.keep_failed,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShopifyConfig {
    pub api_version: String,
    /// Per-request timeout of Admin API calls.
    pub timeout_secs: u64,
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            api_version: crate::collaborators::shopify::DEFAULT_API_VERSION.to_string(),
            timeout_secs: 30,
        }
    }
}

impl ShopifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScraperConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: "Mozilla/5.0 (compatible; StoregenBot/1.0)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_file: Option<String>,
    pub api_key_env_var: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: Some("OPENAI_API_KEY".to_string()),
            base_url: None,
            timeout_secs: 60,
        }
    }
}

impl AiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn api_key_source(&self) -> SecretSource<'_> {
        SecretSource {
            value: self.api_key.as_deref(),
            file: self.api_key_file.as_deref(),
            env_var: self.api_key_env_var.as_deref(),
        }
    }
}
