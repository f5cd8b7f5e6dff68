use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub delegation: DelegationConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub default_model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Total attempts per run, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay unit for backoff: attempt `i` waits `base * 2^i`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_conversational_budget")]
    pub conversational_budget: usize,
    #[serde(default = "default_unattended_budget")]
    pub unattended_budget: usize,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    #[serde(default = "default_history_keep")]
    pub history_keep: usize,
    #[serde(default = "default_result_char_limit")]
    pub result_char_limit: usize,
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelegationConfig {
    #[serde(default = "default_delegation_timeout_ms")]
    pub default_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite file. When unset, agents live in memory for the life of the process.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    17890
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_conversational_budget() -> usize {
    3
}
fn default_unattended_budget() -> usize {
    8
}
fn default_history_cap() -> usize {
    24
}
fn default_history_keep() -> usize {
    12
}
fn default_result_char_limit() -> usize {
    2000
}
fn default_max_delegation_depth() -> usize {
    2
}
fn default_delegation_timeout_ms() -> u64 {
    30_000
}
fn default_max_deliveries() -> u32 {
    2
}
fn default_redelivery_delay_ms() -> u64 {
    5000
}
fn default_channel_capacity() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            default_model: default_llm_model(),
            api_key: String::new(),
            request_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            conversational_budget: default_conversational_budget(),
            unattended_budget: default_unattended_budget(),
            history_cap: default_history_cap(),
            history_keep: default_history_keep(),
            result_char_limit: default_result_char_limit(),
            max_delegation_depth: default_max_delegation_depth(),
        }
    }
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_delegation_timeout_ms(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_deliveries: default_max_deliveries(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RunnerConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}

impl AppConfig {
    /// Resolve the config path: explicit flag, then `$AGENTLOOM_CONFIG`, then the
    /// per-user config directory.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = explicit {
            return Some(p.to_path_buf());
        }
        if let Ok(p) = std::env::var("AGENTLOOM_CONFIG")
            && !p.trim().is_empty()
        {
            return Some(PathBuf::from(p));
        }
        dirs::config_dir().map(|d| d.join("agentloom").join("config.toml"))
    }

    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_path(explicit) {
            Some(path) if path.exists() => {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let parsed = Self::from_toml(&content)
                    .with_context(|| format!("parsing {}", path.display()))?;
                info!("Loaded config from {}", path.display());
                parsed
            }
            Some(path) if explicit.is_some() => {
                anyhow::bail!("config file {} does not exist", path.display());
            }
            _ => {
                info!("No config file found, using defaults.");
                Self::default()
            }
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("AGENTLOOM_LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Ok(url) = std::env::var("AGENTLOOM_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("AGENTLOOM_LLM_MODEL") {
            self.llm.default_model = model;
        }
    }
}
