/*!
common/src/lib.rs

Shared configuration types and helpers for newsbrief.

This file provides:
- Config data structures (deserialized from TOML)
- A loader that merges a default config file with an optional override
- Credential resolution from environment variables named in the config
*/

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod sources;

pub use sources::{Category, Priority, Source, SourceConfig, SourceKind};

/// Errors raised while loading configuration or credentials. All of them are fatal and
/// happen before any external call is made.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required environment variable: {0}")]
    MissingCredential(String),
}

pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";
pub const DEFAULT_SOURCES_PATH: &str = "sources.toml";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// General run settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// IANA time zone used for the briefing date and file names
    pub timezone: Option<String>,
    /// Env var that overrides `timezone` (defaults to NEWS_TIMEZONE)
    pub timezone_env: Option<String>,
    /// Root directory under which `news/<date>/` folders are created
    pub output_dir: Option<String>,
    /// Path to the category/source list
    pub sources_path: Option<String>,
}

impl RunConfig {
    pub fn timezone_env(&self) -> &str {
        self.timezone_env.as_deref().unwrap_or("NEWS_TIMEZONE")
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.output_dir.as_deref().unwrap_or("."))
    }

    pub fn sources_path(&self) -> PathBuf {
        PathBuf::from(self.sources_path.as_deref().unwrap_or(DEFAULT_SOURCES_PATH))
    }
}

/// Search provider settings (Brave Web Search compatible)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub results_per_query: Option<usize>,
    pub max_queries_per_category: Option<usize>,
    pub max_results_per_category: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
    pub backoff_seconds: Option<u64>,
    /// Pause between consecutive queries; a random jitter of up to the same amount is added
    pub politeness_delay_ms: Option<u64>,
}

impl SearchConfig {
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or("https://api.search.brave.com/res/v1/web/search")
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or("BRAVE_API_KEY")
    }

    pub fn results_per_query(&self) -> usize {
        self.results_per_query.unwrap_or(3).clamp(1, 20)
    }

    pub fn max_queries_per_category(&self) -> usize {
        self.max_queries_per_category.unwrap_or(3).max(1)
    }

    pub fn max_results_per_category(&self) -> usize {
        self.max_results_per_category.unwrap_or(6).max(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(30))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3).max(1)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds.unwrap_or(2))
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms.unwrap_or(1000))
    }
}

/// Language model settings (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    /// Env var that overrides `model` (defaults to OPENAI_MODEL)
    pub model_env: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub max_attempts: Option<u32>,
    pub backoff_seconds: Option<u64>,
    pub items_per_category: Option<usize>,
    pub takeaways: Option<usize>,
}

impl LlmConfig {
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1/chat/completions")
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY")
    }

    pub fn model_env(&self) -> &str {
        self.model_env.as_deref().unwrap_or("OPENAI_MODEL")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(60))
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens.unwrap_or(1500)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(0.4)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(2).max(1)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds.unwrap_or(3))
    }

    pub fn items_per_category(&self) -> usize {
        self.items_per_category.unwrap_or(3).max(1)
    }

    pub fn takeaways(&self) -> usize {
        self.takeaways.unwrap_or(3).max(1)
    }
}

/// Messaging delivery settings (Slack Web API)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub enabled: Option<bool>,
    pub api_url: Option<String>,
    /// Channel id, e.g. "C0123456789"
    pub channel: Option<String>,
    /// Env var that overrides `channel` (defaults to SLACK_CHANNEL_ID)
    pub channel_env: Option<String>,
    pub token_env: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub retry_delay_seconds: Option<u64>,
    pub max_message_chars: Option<usize>,
}

impl DeliveryConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or("https://slack.com/api/chat.postMessage")
    }

    pub fn channel_env(&self) -> &str {
        self.channel_env.as_deref().unwrap_or("SLACK_CHANNEL_ID")
    }

    pub fn token_env(&self) -> &str {
        self.token_env.as_deref().unwrap_or("SLACK_BOT_TOKEN")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(20))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds.unwrap_or(5))
    }

    pub fn max_message_chars(&self) -> usize {
        self.max_message_chars.unwrap_or(3500).max(200)
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub delivery: Option<DeliveryConfig>,
}

impl Config {
    /// Load configuration from a single TOML file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = read_file(path).await?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse {
            what: path.display().to_string(),
            source,
        })
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = read_file(path).await?;
            let val: toml::Value = toml::from_str(&data).map_err(|source| ConfigError::Parse {
                what: path.display().to_string(),
                source,
            })?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value
            .try_into()
            .map_err(|source| ConfigError::Parse {
                what: "merged configuration".to_string(),
                source,
            })?;
        Ok(cfg)
    }

    /// Delivery settings, or `None` when messaging is absent or switched off.
    pub fn active_delivery(&self) -> Option<&DeliveryConfig> {
        self.delivery.as_ref().filter(|d| d.enabled())
    }

    /// Switch messaging off for this run, so no messaging credential is required.
    pub fn local_only(mut self) -> Self {
        if let Some(delivery) = self.delivery.as_mut() {
            delivery.enabled = Some(false);
        }
        self
    }
}

async fn read_file(path: &Path) -> Result<String, ConfigError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Secrets and env overrides resolved once at startup.
#[derive(Clone)]
pub struct Credentials {
    pub search_api_key: String,
    pub llm_api_key: String,
    pub model: String,
    /// Slack bot token and channel id; `None` when delivery is disabled
    pub messaging: Option<MessagingCredentials>,
}

#[derive(Clone)]
pub struct MessagingCredentials {
    pub token: String,
    pub channel: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("model", &self.model)
            .field("messaging", &self.messaging.as_ref().map(|m| &m.channel))
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Resolve credentials from the process environment.
    pub fn from_env(config: &Config) -> Result<Self, ConfigError> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Resolve credentials through `lookup`. Every required variable is checked and the
    /// first missing one is reported.
    pub fn resolve<F>(config: &Config, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingCredential(name.to_string()))
        };

        let search_api_key = required(config.search.api_key_env())?;
        let llm_api_key = required(config.llm.api_key_env())?;

        let model = lookup(config.llm.model_env())
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .or_else(|| config.llm.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let messaging = match config.active_delivery() {
            Some(delivery) => {
                let token = required(delivery.token_env())?;
                let channel = lookup(delivery.channel_env())
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .or_else(|| delivery.channel.clone())
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "delivery is enabled but no channel is set (delivery.channel or {})",
                            delivery.channel_env()
                        ))
                    })?;
                Some(MessagingCredentials { token, channel })
            }
            None => None,
        };

        Ok(Self {
            search_api_key,
            llm_api_key,
            model,
            messaging,
        })
    }
}
