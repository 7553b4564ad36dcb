use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::sync::{Backoff, RetryPolicy, SchedulerConfig};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Retry settings as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    /// `linear` or `exponential`
    pub backoff: String,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_secs: policy.initial_delay.as_secs(),
            max_delay_secs: policy.max_delay.as_secs(),
            backoff: "linear".to_string(),
            multiplier: 2.0,
            jitter: policy.jitter,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> Result<RetryPolicy, ConfigError> {
        let backoff = match self.backoff.to_lowercase().as_str() {
            "linear" => Backoff::Linear,
            "exponential" => {
                if !self.multiplier.is_finite() || self.multiplier < 1.0 {
                    return Err(ConfigError::InvalidMultiplier(self.multiplier));
                }
                Backoff::Exponential {
                    multiplier: self.multiplier,
                }
            }
            other => return Err(ConfigError::InvalidBackoff(other.to_string())),
        };

        Ok(RetryPolicy::new(self.max_attempts.max(1))
            .with_initial_delay(Duration::from_secs(self.initial_delay_secs))
            .with_max_delay(Duration::from_secs(self.max_delay_secs))
            .with_backoff(backoff)
            .with_jitter(self.jitter))
    }
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server URL (e.g., "http://192.168.1.20:3000" or "https://sync.example.com")
    pub server_url: Option<String>,
    /// Minutes between background syncs
    pub interval_minutes: u64,
    /// Request timeout
    pub timeout_secs: u64,
    pub retry: RetrySettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            interval_minutes: 15,
            timeout_secs: 30,
            retry: RetrySettings::default(),
        }
    }
}

impl SyncConfig {
    /// Returns true if a server URL is set
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn scheduler(&self) -> Result<SchedulerConfig, ConfigError> {
        Ok(SchedulerConfig {
            interval: Duration::from_secs(
                self.interval_minutes.max(1).saturating_mul(60),
            ),
            retry: self.retry.policy()?,
            ..SchedulerConfig::default()
        })
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the device's SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Sync configuration
    pub sync: SyncConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    sync: Option<SyncConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let default_db_path = Self::default_data_dir().join("perfectfit.db");

        let mut database_path = ConfigValue::new(default_db_path, ConfigSource::Default);
        let mut config_file = None;
        let mut sync = SyncConfig::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("PERFECTFIT_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("PERFECTFIT_SYNC_URL") {
            sync.server_url = Some(url);
        }

        Ok(Self {
            database_path,
            config_file,
            sync,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/perfectfit/
    /// - macOS: ~/Library/Application Support/perfectfit/
    /// - Windows: %APPDATA%/perfectfit/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("perfectfit")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/perfectfit/
    /// - macOS: ~/Library/Application Support/perfectfit/
    /// - Windows: %APPDATA%/perfectfit/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("perfectfit")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    ReadError(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, serde_yaml::Error),
    #[error("Unknown retry backoff '{0}'. Valid options: linear, exponential")]
    InvalidBackoff(String),
    #[error("Invalid retry multiplier {0}: must be a finite number of at least 1")]
    InvalidMultiplier(f64),
}
