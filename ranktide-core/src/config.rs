//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/ranktide/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/ranktide/` (~/.config/ranktide/)
//! - Data: `$XDG_DATA_HOME/ranktide/` (~/.local/share/ranktide/)
//! - State/Logs: `$XDG_STATE_HOME/ranktide/` (~/.local/state/ranktide/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Upstream search analytics provider
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Optional LLM enrichment for report narratives
    #[serde(default)]
    pub enrichment: Option<EnrichmentConfig>,

    /// Report generation knobs
    #[serde(default)]
    pub reporting: ReportingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Search analytics provider configuration.
///
/// Token acquisition (OAuth exchange) happens outside this core; the
/// `api_key` here is whatever bearer credential that layer produced.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Provider API base URL
    pub endpoint: Option<String>,

    /// Bearer credential for the provider API
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for transient failures
    #[serde(default = "default_provider_max_retries")]
    pub max_retries: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: default_provider_timeout(),
            max_retries: default_provider_max_retries(),
        }
    }
}

impl ProviderConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_none() {
            return Err(Error::Config(
                "provider.endpoint is required".to_string(),
            ));
        }
        if self.api_key.is_none() {
            return Err(Error::Config("provider.api_key is required".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "provider.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_provider_max_retries() -> usize {
    3
}

/// LLM enrichment configuration.
///
/// Enrichment is best-effort: when this section is missing or the endpoint
/// is unreachable, reports fall back to the rule-based narrative.
#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    /// LLM API endpoint (Ollama-compatible)
    #[serde(default = "default_enrichment_endpoint")]
    pub endpoint: String,

    /// Model to use
    #[serde(default = "default_enrichment_model")]
    pub model: String,

    /// Hard timeout for the enrichment call, in seconds
    #[serde(default = "default_enrichment_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_enrichment_temperature")]
    pub temperature: f32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_enrichment_endpoint(),
            model: default_enrichment_model(),
            timeout_secs: default_enrichment_timeout(),
            temperature: default_enrichment_temperature(),
        }
    }
}

fn default_enrichment_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_enrichment_model() -> String {
    "llama3.2".to_string()
}

fn default_enrichment_timeout() -> u64 {
    20
}

fn default_enrichment_temperature() -> f32 {
    0.3
}

/// Report generation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReportingConfig {
    /// How many top pages/queries to include per report
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Exact number of action items each report carries
    #[serde(default = "default_task_count")]
    pub task_count: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            task_count: default_task_count(),
        }
    }
}

fn default_top_n() -> usize {
    10
}

fn default_task_count() -> usize {
    3
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/ranktide/config.toml` (~/.config/ranktide/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("ranktide").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    ///
    /// `$XDG_DATA_HOME/ranktide/` (~/.local/share/ranktide/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("ranktide")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/ranktide/` (~/.local/state/ranktide/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("ranktide")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/ranktide/data.db` (~/.local/share/ranktide/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/ranktide/ranktide.log` (~/.local/state/ranktide/ranktide.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("ranktide.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.enrichment.is_none());
        assert_eq!(config.reporting.top_n, 10);
        assert_eq!(config.reporting.task_count, 3);
        assert_eq!(config.provider.timeout_secs, 30);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[provider]
endpoint = "https://search.example.com/api"
api_key = "sk_live_xxxx"
timeout_secs = 10

[enrichment]
model = "llama3.2"

[reporting]
top_n = 5
task_count = 4

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.provider.endpoint.as_deref(),
            Some("https://search.example.com/api")
        );
        assert_eq!(config.provider.timeout_secs, 10);
        assert_eq!(config.enrichment.unwrap().model, "llama3.2");
        assert_eq!(config.reporting.top_n, 5);
        assert_eq!(config.reporting.task_count, 4);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_provider_config_validation() {
        // Missing endpoint/key should fail
        let config = ProviderConfig::default();
        assert!(config.validate().is_err());

        let config = ProviderConfig {
            endpoint: Some("https://search.example.com/api".to_string()),
            api_key: Some("sk_live_test".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
