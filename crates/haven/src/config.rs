//! Configuration management for haven.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::location::TrackingMode;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "haven";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "haven.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `HAVEN_`)
/// 2. TOML config file at `~/.config/haven/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Status escalation timing.
    pub escalation: EscalationConfig,
    /// Location acquisition.
    pub location: LocationConfig,
    /// Document store.
    pub store: StoreConfig,
}

/// Timing of the automatic status cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Seconds without a manual update before a responded member becomes
    /// "Not Yet Responded".
    pub not_yet_responded_after_secs: u64,
    /// Further seconds before "Not Yet Responded" becomes "Unknown".
    pub unknown_after_secs: u64,
    /// Age in seconds under which a location sample counts as fresh.
    pub location_fresh_secs: u64,
    /// Hold off the "Unknown" transition while the member's device keeps
    /// reporting fresh locations.
    pub defer_unknown_when_located: bool,
}

/// Location permission and acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Caller-side bound on each permission request.
    pub permission_timeout_ms: u64,
    /// Bound on a one-shot position fetch.
    pub current_location_timeout_ms: u64,
    /// Oldest OS-cached position accepted by a one-shot fetch.
    pub max_location_age_ms: u64,
    /// Identifier of the OS background location task.
    pub background_task_id: String,
    /// Deferred-delivery distance for background updates, in meters.
    pub background_deferred_distance_m: f64,
    /// Deferred-delivery interval for background updates, in seconds.
    pub background_deferred_interval_secs: u64,
    /// Tracking mode used when emergency mode is off.
    pub default_mode: TrackingMode,
}

/// Document store settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    /// Defaults to `~/.local/share/haven/haven.db`
    pub database_path: Option<PathBuf>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            not_yet_responded_after_secs: 2 * 60 * 60,
            unknown_after_secs: 6 * 60 * 60,
            location_fresh_secs: 5 * 60,
            defer_unknown_when_located: true,
        }
    }
}

impl EscalationConfig {
    /// Delay from a manual update to "Not Yet Responded".
    #[must_use]
    pub fn not_yet_responded_after(&self) -> chrono::Duration {
        secs_to_chrono(self.not_yet_responded_after_secs)
    }

    /// Delay from "Not Yet Responded" to "Unknown".
    #[must_use]
    pub fn unknown_after(&self) -> chrono::Duration {
        secs_to_chrono(self.unknown_after_secs)
    }

    /// Freshness window for location samples.
    #[must_use]
    pub fn location_fresh(&self) -> chrono::Duration {
        secs_to_chrono(self.location_fresh_secs)
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            permission_timeout_ms: 10_000,
            current_location_timeout_ms: 15_000,
            max_location_age_ms: 60_000,
            background_task_id: "haven-background-location".to_string(),
            background_deferred_distance_m: 100.0,
            background_deferred_interval_secs: 300,
            default_mode: TrackingMode::Normal,
        }
    }
}

impl LocationConfig {
    /// Bound on each permission request.
    #[must_use]
    pub fn permission_timeout(&self) -> Duration {
        Duration::from_millis(self.permission_timeout_ms)
    }

    /// Bound on a one-shot position fetch.
    #[must_use]
    pub fn current_location_timeout(&self) -> Duration {
        Duration::from_millis(self.current_location_timeout_ms)
    }

    /// Oldest OS-cached position accepted by a one-shot fetch.
    #[must_use]
    pub fn max_location_age(&self) -> Duration {
        Duration::from_millis(self.max_location_age_ms)
    }

    /// Deferred-delivery interval for background updates.
    #[must_use]
    pub fn background_deferred_interval(&self) -> Duration {
        Duration::from_secs(self.background_deferred_interval_secs)
    }
}

fn secs_to_chrono(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("HAVEN_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            (
                "escalation.not_yet_responded_after_secs",
                self.escalation.not_yet_responded_after_secs,
            ),
            (
                "escalation.unknown_after_secs",
                self.escalation.unknown_after_secs,
            ),
            (
                "escalation.location_fresh_secs",
                self.escalation.location_fresh_secs,
            ),
            (
                "location.permission_timeout_ms",
                self.location.permission_timeout_ms,
            ),
            (
                "location.current_location_timeout_ms",
                self.location.current_location_timeout_ms,
            ),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be greater than 0"),
                });
            }
        }

        if self.location.background_task_id.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "location.background_task_id must not be empty".to_string(),
            });
        }

        if !self.location.background_deferred_distance_m.is_finite()
            || self.location.background_deferred_distance_m < 0.0
        {
            return Err(Error::ConfigValidation {
                message: "location.background_deferred_distance_m must be a non-negative number"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}
