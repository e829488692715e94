//! Configuration infrastructure
//!
//! Runtime tuning for the service: logging, transports, the change watcher,
//! the analytics crawler and the panel presenter. Every timing constant has a
//! default in [`defaults`]; the JSON file only needs to carry overrides.
//!
//! The user-facing filter settings are not part of this file. They live in
//! the settings store (see [`crate::infrastructure::settings_store`]).

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config from file: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub transport: TransportConfig,
    pub watcher: WatcherConfig,
    pub analytics: AnalyticsConfig,
    pub presenter: PresenterConfig,
}

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Directory for the log file; `None` means `<config dir>/logs`
    pub log_dir: Option<PathBuf>,

    pub file_name: String,

    /// Module-specific log level filters (e.g., "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

/// Page transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Timeout for one direct HTTP request
    pub request_timeout_ms: u64,

    pub user_agent: String,

    /// When set, direct fetches to any other origin are refused
    pub pinned_origin: Option<String>,

    /// Absolute timeout for one sandboxed load
    pub fallback_timeout_ms: u64,

    /// Readiness polling of a sandboxed load
    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,

    /// Browserless endpoint for rendered loads, e.g. `http://localhost:3000`
    pub browserless_endpoint: Option<String>,
    pub browserless_token: Option<String>,
}

/// Change watcher timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub throttle_window_ms: u64,
    pub navigation_debounce_ms: u64,
    pub heartbeat_fast_ms: u64,
    pub heartbeat_fast_ticks: u32,
    pub heartbeat_slow_ms: u64,
    /// Capacity of the page event channel
    pub event_buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Review pages fetched per session at most
    pub max_pages: u32,
}

/// Panel and trigger geometry, in CSS pixels, plus hover timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenterConfig {
    pub panel_gap_px: f64,
    pub viewport_margin_px: f64,
    pub trigger_inset_px: f64,
    pub trigger_lift_px: f64,
    pub tile_leave_hide_ms: u64,
    pub trigger_leave_hide_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            module_filters: HashMap::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            user_agent: defaults::USER_AGENT.to_string(),
            pinned_origin: None,
            fallback_timeout_ms: defaults::FALLBACK_TIMEOUT_MS,
            poll_interval_ms: defaults::READY_POLL_INTERVAL_MS,
            poll_max_attempts: defaults::READY_POLL_MAX_ATTEMPTS,
            browserless_endpoint: None,
            browserless_token: None,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            throttle_window_ms: defaults::THROTTLE_WINDOW_MS,
            navigation_debounce_ms: defaults::NAVIGATION_DEBOUNCE_MS,
            heartbeat_fast_ms: defaults::HEARTBEAT_FAST_MS,
            heartbeat_fast_ticks: defaults::HEARTBEAT_FAST_TICKS,
            heartbeat_slow_ms: defaults::HEARTBEAT_SLOW_MS,
            event_buffer: defaults::EVENT_BUFFER,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_pages: defaults::MAX_REVIEW_PAGES,
        }
    }
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            panel_gap_px: defaults::PANEL_GAP_PX,
            viewport_margin_px: defaults::VIEWPORT_MARGIN_PX,
            trigger_inset_px: defaults::TRIGGER_INSET_PX,
            trigger_lift_px: defaults::TRIGGER_LIFT_PX,
            tile_leave_hide_ms: defaults::TILE_LEAVE_HIDE_MS,
            trigger_leave_hide_ms: defaults::TRIGGER_LEAVE_HIDE_MS,
        }
    }
}

impl TransportConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl WatcherConfig {
    pub const fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub const fn navigation_debounce(&self) -> Duration {
        Duration::from_millis(self.navigation_debounce_ms)
    }
}

impl AppConfig {
    /// Layer a config file (any format the `config` crate understands) and
    /// `CATALOG_LENS__SECTION__FIELD` environment variables over the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(defaults::ENV_PREFIX).separator("__"))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall timers or disable the crawler outright.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_checks = [
            ("watcher.throttle_window_ms", self.watcher.throttle_window_ms),
            ("watcher.heartbeat_fast_ms", self.watcher.heartbeat_fast_ms),
            ("watcher.heartbeat_slow_ms", self.watcher.heartbeat_slow_ms),
            ("transport.poll_interval_ms", self.transport.poll_interval_ms),
            ("transport.request_timeout_ms", self.transport.request_timeout_ms),
            ("transport.fallback_timeout_ms", self.transport.fallback_timeout_ms),
        ];
        if let Some((name, _)) = zero_checks.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Validation {
                message: format!("{name} must be greater than zero"),
            });
        }
        if self.analytics.max_pages == 0 {
            return Err(ConfigError::Validation {
                message: "analytics.max_pages must be at least 1".to_string(),
            });
        }
        if self.watcher.event_buffer == 0 {
            return Err(ConfigError::Validation {
                message: "watcher.event_buffer must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration manager for loading and saving the JSON config file
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(defaults::APP_DIR_NAME);

        Ok(config_dir)
    }

    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join(defaults::CONFIG_FILE_NAME);
        Ok(Self { config_path })
    }

    /// Manager for an explicit file, used by hosts with their own layout and by tests
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !fs::try_exists(&self.config_path).await.unwrap_or(false) {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        let parsed = serde_json::from_str::<AppConfig>(&content)
            .map_err(|e| e.to_string())
            .and_then(|config| config.validate().map(|()| config).map_err(|e| e.to_string()));

        match parsed {
            Ok(config) => {
                info!("Loaded configuration from: {:?}", self.config_path);
                Ok(config)
            }
            Err(error) => {
                warn!("Configuration file unusable: {}", error);
                warn!("Resetting to default configuration");

                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(e) = fs::copy(&self.config_path, &backup_path).await {
                    warn!("Failed to create backup of corrupted config: {}", e);
                } else {
                    info!("Backed up corrupted config to: {:?}", backup_path);
                }

                let default_config = AppConfig::default();
                self.save_config(&default_config)
                    .await
                    .context("Failed to save default configuration")?;
                Ok(default_config)
            }
        }
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    pub async fn update_config<F>(&self, updater: F) -> Result<AppConfig>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = self.load_config().await?;
        updater(&mut config);
        self.save_config(&config).await?;
        Ok(config)
    }

    pub async fn reset_to_defaults(&self) -> Result<AppConfig> {
        info!("Resetting configuration to defaults");
        let default_config = AppConfig::default();
        self.save_config(&default_config).await?;
        Ok(default_config)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Default values for every tunable
pub mod defaults {
    pub const APP_DIR_NAME: &str = "catalog-lens";
    pub const CONFIG_FILE_NAME: &str = "catalog_lens_config.json";
    pub const ENV_PREFIX: &str = "CATALOG_LENS";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "catalog-lens.log";

    // Transport
    pub const REQUEST_TIMEOUT_MS: u64 = 15_000;
    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
    pub const FALLBACK_TIMEOUT_MS: u64 = 20_000;
    pub const READY_POLL_INTERVAL_MS: u64 = 100;
    pub const READY_POLL_MAX_ATTEMPTS: u32 = 120;

    // Change watcher
    pub const THROTTLE_WINDOW_MS: u64 = 300;
    pub const NAVIGATION_DEBOUNCE_MS: u64 = 50;
    pub const HEARTBEAT_FAST_MS: u64 = 1_000;
    pub const HEARTBEAT_FAST_TICKS: u32 = 12;
    pub const HEARTBEAT_SLOW_MS: u64 = 3_000;
    pub const EVENT_BUFFER: usize = 256;

    // Analytics
    pub const MAX_REVIEW_PAGES: u32 = 20;

    // Presenter
    pub const PANEL_GAP_PX: f64 = 8.0;
    pub const VIEWPORT_MARGIN_PX: f64 = 12.0;
    pub const TRIGGER_INSET_PX: f64 = 8.0;
    pub const TRIGGER_LIFT_PX: f64 = 36.0;
    pub const TILE_LEAVE_HIDE_MS: u64 = 180;
    pub const TRIGGER_LEAVE_HIDE_MS: u64 = 120;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_timings() {
        let config = AppConfig::default();
        assert_eq!(config.watcher.throttle_window(), Duration::from_millis(300));
        assert_eq!(config.watcher.navigation_debounce(), Duration::from_millis(50));
        assert_eq!(config.transport.poll_max_attempts, 120);
        assert_eq!(config.analytics.max_pages, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut config = AppConfig::default();
        config.watcher.heartbeat_slow_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));
    }

    #[tokio::test]
    async fn first_load_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("nested").join("config.json"));

        let config = manager.load_config().await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(manager.config_path().exists());
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "analytics": { "max_pages": 5 } }"#).unwrap();

        let config = ConfigManager::with_path(&path).load_config().await.unwrap();
        assert_eq!(config.analytics.max_pages, 5);
        assert_eq!(config.watcher, WatcherConfig::default());
    }

    #[tokio::test]
    async fn corrupt_file_is_backed_up_and_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = ConfigManager::with_path(&path).load_config().await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.with_extension("json.corrupted").exists());
    }

    #[test]
    fn from_file_layers_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lens.json");
        std::fs::write(&path, r#"{ "watcher": { "throttle_window_ms": 500 } }"#).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.watcher.throttle_window_ms, 500);
        assert_eq!(config.watcher.heartbeat_fast_ticks, defaults::HEARTBEAT_FAST_TICKS);
    }
}
