//! # Configuration Management Module
//!
//! Type-safe TOML configuration for the monitor, with serde defaults for every
//! field so partial files load and a `validate` pass that rejects values the
//! ingestion loop cannot run with.
//!
//! ## Configuration Structure
//!
//! - [`MonitorConfig`] - snapshot source and poll cadence
//! - [`StorageConfig`] - data directory, throttle, change threshold, retention
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshviewer::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Polling every {}s", config.monitor.poll_interval_seconds);
//!     Config::create_default("config.example.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [monitor]
//! snapshot_file = "data/nodes.json"
//! poll_interval_seconds = 300
//! show_all_nodes = false
//!
//! [storage]
//! data_dir = "./data"
//! throttle_seconds = 240
//! uptime_epsilon_hours = 0.01
//! retention_days = 30
//! retention_check_minutes = 60
//!
//! [logging]
//! level = "info"
//! # file = "meshviewer.log"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::storage::{WriterSettings, DEFAULT_THROTTLE_SECS, DEFAULT_UPTIME_EPSILON_HOURS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Node-db JSON dump read by the file snapshot provider.
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// List every node with telemetry, not only favorites.
    #[serde(default)]
    pub show_all_nodes: bool,
}

fn default_snapshot_file() -> String {
    "data/nodes.json".to_string()
}

fn default_poll_interval() -> u64 {
    300
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            snapshot_file: default_snapshot_file(),
            poll_interval_seconds: default_poll_interval(),
            show_all_nodes: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Minimum seconds between persisted batches, across all nodes.
    #[serde(default = "default_throttle")]
    pub throttle_seconds: i64,
    /// Uptime movement (hours) below which a node is considered unchanged.
    #[serde(default = "default_epsilon")]
    pub uptime_epsilon_hours: f64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// How often the running monitor trims the log; 0 disables.
    #[serde(default = "default_retention_check")]
    pub retention_check_minutes: u64,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_throttle() -> i64 {
    DEFAULT_THROTTLE_SECS
}

fn default_epsilon() -> f64 {
    DEFAULT_UPTIME_EPSILON_HOURS
}

fn default_retention_days() -> u32 {
    30
}

fn default_retention_check() -> u64 {
    60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            throttle_seconds: default_throttle(),
            uptime_epsilon_hours: default_epsilon(),
            retention_days: default_retention_days(),
            retention_check_minutes: default_retention_check(),
        }
    }
}

impl StorageConfig {
    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings {
            throttle_secs: self.throttle_seconds,
            uptime_epsilon_hours: self.uptime_epsilon_hours,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Parsed level, `None` when the string is not a known level.
    pub fn level_filter(&self) -> Option<log::LevelFilter> {
        self.level.parse().ok()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config
            .validate()
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor.poll_interval_seconds == 0 {
            return Err(anyhow!("monitor.poll_interval_seconds must be greater than 0"));
        }
        if self.storage.throttle_seconds < 0 || self.storage.throttle_seconds > 86_400 * 365 {
            return Err(anyhow!(
                "storage.throttle_seconds must be between 0 and one year, got {}",
                self.storage.throttle_seconds
            ));
        }
        let eps = self.storage.uptime_epsilon_hours;
        if !eps.is_finite() || eps < 0.0 {
            return Err(anyhow!(
                "storage.uptime_epsilon_hours must be a non-negative number, got {}",
                eps
            ));
        }
        if self.storage.retention_days == 0 {
            return Err(anyhow!("storage.retention_days must be at least 1"));
        }
        if self.logging.level_filter().is_none() {
            return Err(anyhow!("logging.level '{}' is not a log level", self.logging.level));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_ingestion_constants() {
        let config = Config::default();
        assert_eq!(config.monitor.poll_interval_seconds, 300);
        assert_eq!(config.storage.throttle_seconds, 240);
        assert_eq!(config.storage.uptime_epsilon_hours, 0.01);
        assert_eq!(config.storage.retention_days, 30);
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.writer_settings(), WriterSettings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            data_dir = "/var/lib/meshviewer"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.data_dir, "/var/lib/meshviewer");
        assert_eq!(config.storage.throttle_seconds, 240);
        assert_eq!(config.monitor.snapshot_file, "data/nodes.json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.monitor.poll_interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.uptime_epsilon_hours = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.retention_days = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.storage.retention_check_minutes, 60);
        assert!(!parsed.monitor.show_all_nodes);
    }

    #[tokio::test]
    async fn test_load_reports_path_on_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let path = path.to_str().unwrap();
        let err = Config::load(path).await.unwrap_err();
        assert!(err.to_string().contains(path));

        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.storage.data_dir, "./data");
    }
}
