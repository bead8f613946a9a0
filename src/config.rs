//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.accessreview.toml` files.

use crate::models::Source;
use crate::narrative::{EngineConfig, GenerationParams, RetryPolicy};
use crate::pipeline::RunSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".accessreview.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Evidence collection settings.
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Delivery settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory the CSV artifact is written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            verbose: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

/// Evidence collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Directory holding one `<source>.json` provider export per source.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,

    /// Account or scope label the review runs for.
    #[serde(default = "default_account")]
    pub account: String,

    /// Length of the reviewed time window.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    /// Bounded wait for each collector, in seconds.
    #[serde(default = "default_collector_wait")]
    pub collector_wait_seconds: u64,

    /// Access keys older than this are reported.
    #[serde(default = "default_max_key_age")]
    pub max_key_age_days: i64,

    /// Sources to collect from.
    #[serde(default = "default_sources")]
    pub sources: Vec<Source>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: default_snapshot_dir(),
            account: default_account(),
            lookback_days: default_lookback_days(),
            collector_wait_seconds: default_collector_wait(),
            max_key_age_days: default_max_key_age(),
            sources: default_sources(),
        }
    }
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

fn default_account() -> String {
    "default".to_string()
}

fn default_lookback_days() -> i64 {
    7
}

fn default_collector_wait() -> u64 {
    30
}

fn default_max_key_age() -> i64 {
    90
}

fn default_sources() -> Vec<Source> {
    Source::ALL.to_vec()
}

/// Summarization model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Call the model at all. When false the fallback narrative is used.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Default model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens in response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Number of retries on retryable failures.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// First backoff delay; doubles on each retry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_base_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_timeout(),
            retries: default_retries(),
            backoff_base_ms: default_backoff_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_timeout() -> u64 {
    120
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    500
}

/// Delivery backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    /// Outbox directory on the local filesystem.
    #[default]
    Directory,
    /// HTTP object PUT plus JSON webhook.
    Webhook,
}

/// Delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub kind: DeliveryKind,

    /// Outbox for the directory transport.
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,

    /// Base URL artifacts are PUT under (webhook transport).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_base_url: Option<String>,

    /// URL notifications are POSTed to (webhook transport).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Notification recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    /// HTTP timeout in seconds.
    #[serde(default = "default_delivery_timeout")]
    pub timeout_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            kind: DeliveryKind::default(),
            outbox_dir: default_outbox_dir(),
            upload_base_url: None,
            webhook_url: None,
            recipient: None,
            timeout_seconds: default_delivery_timeout(),
        }
    }
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from("outbox")
}

fn default_delivery_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref dir) = args.snapshot_dir {
            self.collection.snapshot_dir = dir.clone();
        }
        if let Some(ref account) = args.account {
            self.collection.account = account.clone();
        }
        if let Some(ref dir) = args.output_dir {
            self.general.output_dir = dir.clone();
        }

        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if args.no_model {
            self.model.enabled = false;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check values that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.collection.sources.is_empty() {
            anyhow::bail!("collection.sources must name at least one source");
        }
        if self.collection.lookback_days < 1 {
            anyhow::bail!("collection.lookback_days must be at least 1");
        }
        if self.collection.collector_wait_seconds == 0 {
            anyhow::bail!("collection.collector_wait_seconds must be at least 1");
        }
        if self.model.timeout_seconds == 0 {
            anyhow::bail!("model.timeout_seconds must be at least 1");
        }
        if self.delivery.kind == DeliveryKind::Webhook
            && (self.delivery.upload_base_url.is_none() || self.delivery.webhook_url.is_none())
        {
            anyhow::bail!("webhook delivery requires delivery.upload_base_url and delivery.webhook_url");
        }
        Ok(())
    }

    /// Narrative engine settings derived from `[model]`.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            call_timeout: Duration::from_secs(self.model.timeout_seconds),
            retry: RetryPolicy {
                max_retries: self.model.retries,
                backoff_base: Duration::from_millis(self.model.backoff_base_ms),
            },
            params: GenerationParams {
                max_tokens: self.model.max_tokens,
                temperature: self.model.temperature,
            },
        }
    }

    /// Run settings derived from `[general]` and `[collection]`.
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            account: self.collection.account.clone(),
            lookback_days: self.collection.lookback_days,
            max_key_age_days: self.collection.max_key_age_days,
            collector_wait: Duration::from_secs(self.collection.collector_wait_seconds),
            output_dir: self.general.output_dir.clone(),
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.name, "llama3.2:latest");
        assert!(config.model.enabled);
        assert_eq!(config.collection.sources.len(), 5);
        assert_eq!(config.delivery.kind, DeliveryKind::Directory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output_dir = "/var/lib/accessreview"
verbose = true

[collection]
account = "prod-123456789012"
sources = ["access-policy", "audit-log"]

[model]
name = "qwen2.5:14b"
temperature = 0.2
enabled = false

[delivery]
kind = "webhook"
upload_base_url = "https://evidence.example.com/reports"
webhook_url = "https://hooks.example.com/access-review"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output_dir, PathBuf::from("/var/lib/accessreview"));
        assert!(config.general.verbose);
        assert_eq!(config.collection.account, "prod-123456789012");
        assert_eq!(
            config.collection.sources,
            vec![Source::AccessPolicy, Source::AuditLog]
        );
        assert_eq!(config.collection.lookback_days, 7);
        assert_eq!(config.model.name, "qwen2.5:14b");
        assert_eq!(config.model.temperature, 0.2);
        assert!(!config.model.enabled);
        assert_eq!(config.delivery.kind, DeliveryKind::Webhook);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_webhook_requires_urls() {
        let mut config = Config::default();
        config.delivery.kind = DeliveryKind::Webhook;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config_mapping() {
        let mut config = Config::default();
        config.model.retries = 4;
        config.model.backoff_base_ms = 250;

        let engine = config.engine_config();
        assert_eq!(engine.call_timeout, Duration::from_secs(120));
        assert_eq!(engine.retry.max_retries, 4);
        assert_eq!(engine.retry.backoff_base, Duration::from_millis(250));
        assert_eq!(engine.params.max_tokens, 2048);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[collection]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[delivery]"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.collection.sources, Source::ALL.to_vec());
    }
}
