//! Overseer Configuration
//!
//! This module defines the configuration structures with proper defaults
//! using derive macros and serde attributes, the loader/validator pair, and
//! the live [`SharedConfig`] whose notification section can be replaced at
//! runtime.

use crate::error::{OverseerError, Result};
use crate::events::{Event, EventBus, DEFAULT_SUBSCRIBER_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;

// ============================================================================
// Constants
// ============================================================================

/// Pause between two successful polls of one target (ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
/// Upper bound for connecting and for the info and player requests (ms).
/// Never below the online threshold, so slow servers still report offline.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;
/// Latency below which a server counts as online (ms)
pub const DEFAULT_ONLINE_THRESHOLD_MS: u64 = 5000;
/// Interval of the self-healing reconcile against the store (seconds)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
/// First retry delay after a failed poll (ms)
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 500;
/// Retry delay ceiling (ms)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
/// Capacity of the shared poll-result channel
pub const DEFAULT_RESULT_BUFFER: usize = 64;
/// Default server store file name
pub const DEFAULT_SERVERS_FILE: &str = "servers.json";
/// Default watchlist file name
pub const DEFAULT_WATCHLIST_FILE: &str = "watchlist.json";
/// Default store autosave interval (seconds)
pub const DEFAULT_AUTOSAVE_INTERVAL: u64 = 60;

// ============================================================================
// Helper functions for paths (required for serde defaults)
// ============================================================================

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_overseer_dir() -> PathBuf {
    home_dir().join(".overseer")
}

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Poll worker and reconciler tuning
    #[serde(default)]
    pub observer: ObserverConfig,
    /// Event bus tuning
    #[serde(default)]
    pub bus: BusConfig,
    /// JSON store locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// Notification delivery services
    #[serde(default, rename = "notification-service")]
    pub notification: NotificationConfig,
}

// ============================================================================
// Observer Config
// ============================================================================

/// Poll worker and reconciler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default = "ObserverConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "ObserverConfig::default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "ObserverConfig::default_online_threshold_ms")]
    pub online_threshold_ms: u64,
    /// Periodic self-healing reconciliation; off when null
    #[serde(default = "ObserverConfig::default_reconcile_interval_secs")]
    pub reconcile_interval_secs: Option<u64>,
    #[serde(default = "ObserverConfig::default_result_buffer")]
    pub result_buffer: usize,
    #[serde(default)]
    pub retry_backoff: BackoffConfig,
}

impl ObserverConfig {
    fn default_poll_interval_ms() -> u64 {
        DEFAULT_POLL_INTERVAL_MS
    }
    fn default_query_timeout_ms() -> u64 {
        DEFAULT_QUERY_TIMEOUT_MS
    }
    fn default_online_threshold_ms() -> u64 {
        DEFAULT_ONLINE_THRESHOLD_MS
    }
    fn default_reconcile_interval_secs() -> Option<u64> {
        Some(DEFAULT_RECONCILE_INTERVAL_SECS)
    }
    fn default_result_buffer() -> usize {
        DEFAULT_RESULT_BUFFER
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn online_threshold(&self) -> Duration {
        Duration::from_millis(self.online_threshold_ms)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        self.reconcile_interval_secs.map(Duration::from_secs)
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            online_threshold_ms: DEFAULT_ONLINE_THRESHOLD_MS,
            reconcile_interval_secs: Some(DEFAULT_RECONCILE_INTERVAL_SECS),
            result_buffer: DEFAULT_RESULT_BUFFER,
            retry_backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential retry backoff bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "BackoffConfig::default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "BackoffConfig::default_max_ms")]
    pub max_ms: u64,
}

impl BackoffConfig {
    fn default_initial_ms() -> u64 {
        DEFAULT_BACKOFF_INITIAL_MS
    }
    fn default_max_ms() -> u64 {
        DEFAULT_BACKOFF_MAX_MS
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: DEFAULT_BACKOFF_INITIAL_MS,
            max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

// ============================================================================
// Bus Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Queue length per subscriber before events are dropped
    #[serde(default = "BusConfig::default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

impl BusConfig {
    fn default_subscriber_capacity() -> usize {
        DEFAULT_SUBSCRIBER_CAPACITY
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

// ============================================================================
// Storage Config
// ============================================================================

/// JSON store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "StorageConfig::default_servers_file")]
    pub servers_file: String,
    #[serde(default = "StorageConfig::default_watchlist_file")]
    pub watchlist_file: String,
    /// Autosave interval in seconds
    #[serde(default = "StorageConfig::default_autosave_interval")]
    pub autosave_interval_secs: u64,
}

impl StorageConfig {
    fn default_data_dir() -> PathBuf {
        default_overseer_dir()
    }
    fn default_servers_file() -> String {
        DEFAULT_SERVERS_FILE.to_string()
    }
    fn default_watchlist_file() -> String {
        DEFAULT_WATCHLIST_FILE.to_string()
    }
    fn default_autosave_interval() -> u64 {
        DEFAULT_AUTOSAVE_INTERVAL
    }

    pub fn servers_path(&self) -> PathBuf {
        self.data_dir.join(&self.servers_file)
    }

    pub fn watchlist_path(&self) -> PathBuf {
        self.data_dir.join(&self.watchlist_file)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            servers_file: DEFAULT_SERVERS_FILE.to_string(),
            watchlist_file: DEFAULT_WATCHLIST_FILE.to_string(),
            autosave_interval_secs: DEFAULT_AUTOSAVE_INTERVAL,
        }
    }
}

// ============================================================================
// Notification Config
// ============================================================================

/// The `notification-service` section; one optional block per platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordSettings>,
}

impl NotificationConfig {
    pub fn is_empty(&self) -> bool {
        self.discord.is_none()
    }
}

/// Discord bot credentials and target channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscordSettings {
    pub token: String,
    #[serde(rename = "channelID", alias = "channel_id")]
    pub channel_id: String,
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file or default locations.
    ///
    /// An explicitly given path that does not exist yet is created with
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        Self::load_with_path(path).map(|(_, config)| config)
    }

    /// Like [`load`](Self::load), also returning the file that was read
    pub fn load_with_path(path: Option<&Path>) -> Result<(PathBuf, Config)> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    tracing::info!("Config {:?} missing, writing defaults", p);
                    Config::default().save(p)?;
                }
                p.to_path_buf()
            }
            None => Self::resolve_config_path()?,
        };
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| OverseerError::config_parse_error(format!("Failed to read: {}", e)))?;
        let config: Config = serde_yml::from_str(&content)
            .map_err(|e| OverseerError::config_parse_error(format!("Failed to parse: {}", e)))?;
        ConfigValidator::validate(&config)?;
        Ok((config_path, config))
    }

    /// Default config location used by `init` and when no path is given
    pub fn default_path() -> PathBuf {
        default_overseer_dir().join("config.yaml")
    }

    fn resolve_config_path() -> Result<PathBuf> {
        let default_paths = [Self::default_path(), PathBuf::from("./overseer.yaml")];

        if let Some(found) = default_paths.iter().find(|p| p.exists()) {
            return Ok(found.clone());
        }
        let searched: Vec<String> = default_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        Err(OverseerError::config_not_found(searched.join(", ")))
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<()> {
        let observer = &config.observer;
        if observer.poll_interval_ms == 0 {
            return Err(OverseerError::config_invalid(
                "observer.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if observer.query_timeout_ms == 0 {
            return Err(OverseerError::config_invalid(
                "observer.query_timeout_ms",
                "must be greater than zero",
            ));
        }
        if observer.online_threshold_ms == 0 {
            return Err(OverseerError::config_invalid(
                "observer.online_threshold_ms",
                "must be greater than zero",
            ));
        }
        if observer.query_timeout_ms < observer.online_threshold_ms {
            return Err(OverseerError::config_invalid(
                "observer.query_timeout_ms",
                format!(
                    "must not be below online_threshold_ms ({} < {})",
                    observer.query_timeout_ms, observer.online_threshold_ms
                ),
            ));
        }
        if observer.result_buffer == 0 {
            return Err(OverseerError::config_invalid(
                "observer.result_buffer",
                "must be greater than zero",
            ));
        }
        if observer.reconcile_interval_secs == Some(0) {
            return Err(OverseerError::config_invalid(
                "observer.reconcile_interval_secs",
                "must be greater than zero when set",
            ));
        }
        let backoff = &observer.retry_backoff;
        if backoff.initial_ms == 0 || backoff.initial_ms > backoff.max_ms {
            return Err(OverseerError::config_invalid(
                "observer.retry_backoff",
                format!(
                    "need 0 < initial_ms <= max_ms, got {} / {}",
                    backoff.initial_ms, backoff.max_ms
                ),
            ));
        }

        if config.bus.subscriber_capacity == 0 {
            return Err(OverseerError::config_invalid(
                "bus.subscriber_capacity",
                "must be greater than zero",
            ));
        }

        if let Some(discord) = &config.notification.discord {
            if discord.token.trim().is_empty() {
                return Err(OverseerError::config_invalid(
                    "notification-service.discord.token",
                    "cannot be empty",
                ));
            }
            if discord.channel_id.trim().is_empty() {
                return Err(OverseerError::config_invalid(
                    "notification-service.discord.channelID",
                    "cannot be empty",
                ));
            }
        }

        Ok(())
    }
}

impl Config {
    /// Save configuration to file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_yml::to_string(self).map_err(|e| {
            OverseerError::config_parse_error(format!("Serialization failed: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Config {
            observer: ObserverConfig::default(),
            bus: BusConfig::default(),
            storage: StorageConfig::default(),
            notification: NotificationConfig {
                discord: Some(DiscordSettings {
                    token: "YOUR_BOT_TOKEN".to_string(),
                    channel_id: "123456789012345678".to_string(),
                }),
            },
        }
    }
}

// ============================================================================
// Live configuration
// ============================================================================

/// Configuration shared by the running process.
///
/// Replacing the notification section persists the file and announces the
/// new section on the bus as [`Event::ConfigChanged`]. [`SharedConfig::reload`]
/// picks up a section some other process wrote to the file; every other
/// section only takes effect on restart.
pub struct SharedConfig {
    path: PathBuf,
    config: RwLock<Config>,
    bus: EventBus,
}

impl SharedConfig {
    pub fn new(path: PathBuf, config: Config, bus: EventBus) -> Self {
        Self {
            path,
            config: RwLock::new(config),
            bus,
        }
    }

    pub async fn current(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn update_notification(&self, notification: NotificationConfig) -> Result<()> {
        {
            let mut config = self.config.write().await;
            let mut next = config.clone();
            next.notification = notification.clone();
            ConfigValidator::validate(&next)?;
            next.save(&self.path)?;
            *config = next;
        }
        tracing::info!("notification config updated, announcing change");
        self.bus.publish(Event::ConfigChanged(notification)).await;
        Ok(())
    }

    /// Re-read the file and announce its notification section if it changed.
    /// Returns whether anything was announced.
    pub async fn reload(&self) -> Result<bool> {
        if !self.path.exists() {
            return Err(OverseerError::config_not_found(self.path.display().to_string()));
        }
        let (_, fresh) = ConfigLoader::load_with_path(Some(&self.path))?;
        {
            let mut config = self.config.write().await;
            if config.notification == fresh.notification {
                return Ok(false);
            }
            config.notification = fresh.notification.clone();
        }
        tracing::info!("notification config reloaded from {:?}", self.path);
        self.bus.publish(Event::ConfigChanged(fresh.notification)).await;
        Ok(true)
    }
}
