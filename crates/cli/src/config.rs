//! Application configuration loaded from `newsgate.toml`.
//!
//! Every field has a default, so an empty file is valid. Without a file at
//! the default path the defaults are used as they are.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use llm::AnthropicSettings;
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "newsgate.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Reads and validates `path`. A missing file is only accepted for the
    /// default path.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("loading config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content).context("invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.pipeline.validate()?;
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            anyhow::bail!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            );
        }
        if self.provider.max_tokens == 0 {
            anyhow::bail!("provider.max_tokens must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.provider.temperature) {
            anyhow::bail!("provider.temperature must be within [0, 1]");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    #[serde(default = "default_level")]
    pub level: String,
    /// `"json"` or `"pretty"`.
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

fn default_level() -> String {
    "info".into()
}

fn default_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`. Export is off when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "newsgate".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the stage partitions and cost reports.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// JSON array or JSON-lines file of scraped articles.
    #[serde(default = "default_articles_path")]
    pub articles_path: PathBuf,
    /// JSON file holding the latest market snapshot.
    #[serde(default = "default_market_path")]
    pub market_path: PathBuf,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            articles_path: default_articles_path(),
            market_path: default_market_path(),
        }
    }
}

fn default_articles_path() -> PathBuf {
    PathBuf::from("input/articles.jsonl")
}

fn default_market_path() -> PathBuf {
    PathBuf::from("input/market.json")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    Mock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn anthropic_settings(&self) -> AnthropicSettings {
        AnthropicSettings {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            base_url: self.base_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

fn default_model() -> String {
    AnthropicSettings::default().model
}

fn default_max_tokens() -> u32 {
    AnthropicSettings::default().max_tokens
}

fn default_temperature() -> f64 {
    AnthropicSettings::default().temperature
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}

fn default_base_url() -> String {
    llm::anthropic::DEFAULT_BASE_URL.into()
}

fn default_request_timeout_secs() -> u64 {
    90
}
