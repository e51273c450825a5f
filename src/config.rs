//! Configuration file handling.
//!
//! This module provides loading and saving of pkgrisk configuration
//! from a TOML file.
//!
//! # Configuration Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/pkgrisk/config.toml`
//! - macOS: `~/Library/Application Support/pkgrisk/config.toml`
//! - Windows: `%APPDATA%\pkgrisk\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! default_format = "table"
//! source_timeout_secs = 10
//! merge_policy = "prefer-higher-severity"
//!
//! [narrative]
//! max_retries = 2
//! retry_delay_ms = 1000
//!
//! [weights.scripts]
//! postinstall = 25
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::advisory::{MergePolicy, GITHUB_API_URL, OSV_API_URL};
use crate::error::ConfigError;
use crate::narrative::RetryPolicy;
use crate::scoring::{WeightedModel, Weights};

/// Application configuration.
///
/// Every field has a default, so a partial file only overrides what it names.
///
/// # Example
///
/// ```no_run
/// use pkgrisk::Config;
///
/// // Load from file (or use defaults if file doesn't exist)
/// let config = Config::load().unwrap();
///
/// println!("Source timeout: {}s", config.source_timeout_secs);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default output format when no `--format` flag is provided.
    ///
    /// Valid values: "table", "json"
    /// Default: "table"
    pub default_format: String,

    /// Base URL of the GitHub REST API.
    pub github_api_url: String,

    /// Base URL of the OSV API.
    pub osv_api_url: String,

    /// Time budget for each vulnerability source, in seconds.
    ///
    /// A source that exceeds it is treated as unavailable.
    /// Default: 10
    pub source_timeout_secs: u64,

    /// How duplicate advisories from different sources are merged.
    ///
    /// Default: "prefer-higher-severity"
    pub merge_policy: MergePolicy,

    /// Narrative generation retry settings.
    pub narrative: NarrativeConfig,

    /// Scoring weight table.
    pub weights: Weights,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub attempt_timeout_secs: u64,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            retry_delay_ms: policy.retry_delay.as_millis() as u64,
            attempt_timeout_secs: policy.attempt_timeout.as_secs(),
        }
    }
}

impl From<&NarrativeConfig> for RetryPolicy {
    fn from(config: &NarrativeConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_format: "table".to_string(),
            github_api_url: GITHUB_API_URL.to_string(),
            osv_api_url: OSV_API_URL.to_string(),
            source_timeout_secs: 10,
            merge_policy: MergePolicy::default(),
            narrative: NarrativeConfig::default(),
            weights: Weights::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the config file.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Loads configuration from `path`, falling back to defaults when the
    /// file is absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration to the config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Returns the path to the configuration file.
    ///
    /// # Example
    ///
    /// ```
    /// use pkgrisk::Config;
    ///
    /// let path = Config::config_path();
    /// assert!(path.ends_with("pkgrisk/config.toml"));
    /// ```
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pkgrisk")
            .join("config.toml")
    }

    /// Generates a string containing the default configuration.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Checks values that parse but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.default_format.to_lowercase().as_str(), "table" | "json") {
            return Err(ConfigError::InvalidValue {
                field: "default_format",
                reason: format!("unknown format '{}'", self.default_format),
            });
        }

        for (field, url) in [
            ("github_api_url", &self.github_api_url),
            ("osv_api_url", &self.osv_api_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("'{}' is not an http(s) URL", url),
                });
            }
        }

        if self.source_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "source_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.narrative.attempt_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "narrative.attempt_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        self.weights.validate()
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.narrative)
    }

    /// Builds the risk model from the configured weights.
    pub fn risk_model(&self) -> Result<WeightedModel, ConfigError> {
        WeightedModel::new(self.weights.clone())
    }
}
