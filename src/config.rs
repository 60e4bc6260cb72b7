//! TOML configuration for the `kf` client.
//!
//! See `config/kf.example.toml` for a fully commented example.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::chunking::ChunkingConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Settings for the external MinerU (KnowFlow) parse API.
#[derive(Debug, Deserialize, Clone)]
pub struct ParserConfig {
    #[serde(default)]
    pub knowflow_api_url: Option<String>,
    #[serde(default = "default_parse_method")]
    pub parse_method: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Used when a document carries no chunking config of its own.
    #[serde(default)]
    pub chunking: Option<ChunkingConfig>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            knowflow_api_url: None,
            parse_method: default_parse_method(),
            language: default_language(),
            chunking: None,
        }
    }
}

fn default_parse_method() -> String {
    "auto".to_string()
}
fn default_language() -> String {
    "ch".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: default_max_attempts(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_interval_ms() -> u64 {
    2000
}
fn default_max_attempts() -> u32 {
    60
}
fn default_log_capacity() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Seconds a finished document stays on the board; 0 keeps it forever.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl ServerConfig {
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_secs > 0).then(|| Duration::from_secs(self.retention_secs))
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}
fn default_retention_secs() -> u64 {
    3600
}

impl Config {
    /// A usable configuration pointing at a local backend.
    pub fn minimal() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:5000".to_string(),
                token: None,
                timeout_secs: default_timeout_secs(),
            },
            parser: ParserConfig::default(),
            polling: PollingConfig::default(),
            upload: UploadConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Knowledge-base base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api.base_url.trim_end_matches('/')
    }

    /// KnowFlow parse API base URL without a trailing slash, if configured.
    pub fn knowflow_url(&self) -> Option<&str> {
        self.parser
            .knowflow_api_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(token) = std::env::var("KF_API_TOKEN") {
        if !token.is_empty() {
            config.api.token = Some(token);
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate api
    if !is_http_url(&config.api.base_url) {
        anyhow::bail!("api.base_url must be an http(s) URL");
    }
    if config.api.timeout_secs == 0 {
        anyhow::bail!("api.timeout_secs must be > 0");
    }

    // Validate parser
    if let Some(url) = config.parser.knowflow_api_url.as_deref() {
        if !url.is_empty() && !is_http_url(url) {
            anyhow::bail!("parser.knowflow_api_url must be an http(s) URL");
        }
    }
    if let Some(chunking) = &config.parser.chunking {
        chunking
            .validate()
            .map_err(|e| anyhow::anyhow!("parser.chunking: {}", e))?;
    }

    // Validate polling
    if config.polling.interval_ms == 0 {
        anyhow::bail!("polling.interval_ms must be > 0");
    }
    if config.polling.max_attempts == 0 {
        anyhow::bail!("polling.max_attempts must be >= 1");
    }
    if config.polling.log_capacity == 0 {
        anyhow::bail!("polling.log_capacity must be >= 1");
    }

    if config.upload.batch_size == 0 {
        anyhow::bail!("upload.batch_size must be >= 1");
    }

    Ok(())
}

fn is_http_url(s: &str) -> bool {
    s.strip_prefix("http://")
        .or_else(|| s.strip_prefix("https://"))
        .is_some_and(|rest| !rest.is_empty())
}
