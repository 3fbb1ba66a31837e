//! Tracking modes and cached samples.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::provider::{Accuracy, Position, WatchOptions};

/// How aggressively the device is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Everyday tracking.
    #[default]
    Normal,
    /// Sparse updates to save battery.
    PowerSave,
    /// Dense, high-accuracy updates during an emergency.
    Emergency,
    /// The device has not moved for a while.
    Stationary,
}

impl TrackingMode {
    /// Watch parameters for this mode.
    #[must_use]
    pub fn watch_options(self) -> WatchOptions {
        let (accuracy, secs, meters) = match self {
            Self::Normal => (Accuracy::Balanced, 30, 50.0),
            Self::PowerSave => (Accuracy::Low, 120, 200.0),
            Self::Emergency => (Accuracy::High, 5, 10.0),
            Self::Stationary => (Accuracy::Low, 300, 500.0),
        };
        WatchOptions {
            accuracy,
            time_interval: Duration::from_secs(secs),
            distance_interval_m: meters,
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::PowerSave => "power_save",
            Self::Emergency => "emergency",
            Self::Stationary => "stationary",
        })
    }
}

/// Where a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    /// A foreground watch or one-shot fetch.
    Foreground,
    /// The OS background task.
    Background,
    /// Restored from the store rather than observed by this process.
    Cached,
}

/// A recorded position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Accuracy radius in meters.
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
    /// Where the fix came from.
    pub source: LocationSource,
}

impl LocationSample {
    /// Record a provider fix.
    #[must_use]
    pub fn new(position: Position, source: LocationSource) -> Self {
        Self {
            latitude: position.latitude,
            longitude: position.longitude,
            accuracy: position.accuracy,
            timestamp: position.timestamp,
            source,
        }
    }

    /// Age of the sample at `now`. Samples stamped in the future are zero
    /// seconds old.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.timestamp).max(chrono::Duration::zero())
    }
}

/// Whether `sample` is no older than `threshold` at `now`.
#[must_use]
pub fn is_fresh(sample: &LocationSample, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
    sample.age(now) <= threshold
}
