//! The OS location API as the engine sees it.

use std::fmt::{self, Debug};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::LocationResult;

/// Requested fix accuracy, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    /// Cell-tower level.
    Low,
    /// Wi-Fi level.
    Balanced,
    /// GPS level.
    High,
}

/// A position fix reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Horizontal accuracy radius in meters, when the OS reports one.
    pub accuracy: Option<f64>,
    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

/// Parameters of a continuous position watch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    /// Requested accuracy.
    pub accuracy: Accuracy,
    /// Minimum time between updates.
    pub time_interval: Duration,
    /// Minimum movement between updates, in meters.
    pub distance_interval_m: f64,
}

/// Parameters of an OS background location task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundTaskOptions {
    /// The underlying watch.
    pub watch: WatchOptions,
    /// Batch updates until the device moved this far, in meters.
    pub deferred_distance_m: f64,
    /// Batch updates for at most this long.
    pub deferred_interval: Duration,
}

/// Handle of a running foreground watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// Device location services.
///
/// Permission calls may never return (an OS dialog left open); callers bound
/// them with their own timeout. Positions from watches and background tasks
/// are delivered on the supplied channel until the watch is cleared or the
/// task unregistered.
#[async_trait]
pub trait LocationProvider: Send + Sync + Debug {
    /// Whether location services are switched on.
    async fn has_services_enabled(&self) -> LocationResult<bool>;

    /// Current foreground permission, without prompting.
    async fn get_foreground_permission(&self) -> LocationResult<bool>;

    /// Prompt for foreground permission.
    async fn request_foreground_permission(&self) -> LocationResult<bool>;

    /// Current background permission, without prompting.
    async fn get_background_permission(&self) -> LocationResult<bool>;

    /// Prompt for background permission.
    async fn request_background_permission(&self) -> LocationResult<bool>;

    /// One-shot fix. A cached fix no older than `max_age` may be returned.
    async fn get_current_position(
        &self,
        accuracy: Accuracy,
        timeout: Duration,
        max_age: Duration,
    ) -> LocationResult<Position>;

    /// Start a continuous watch.
    async fn watch_position(
        &self,
        options: WatchOptions,
        updates: mpsc::Sender<Position>,
    ) -> LocationResult<WatchId>;

    /// Stop a watch started by [`LocationProvider::watch_position`].
    async fn clear_watch(&self, id: WatchId) -> LocationResult<()>;

    /// Register a background task that survives app suspension.
    async fn register_background_task(
        &self,
        task_id: &str,
        options: BackgroundTaskOptions,
        updates: mpsc::Sender<Position>,
    ) -> LocationResult<()>;

    /// Unregister a background task.
    async fn unregister_background_task(&self, task_id: &str) -> LocationResult<()>;
}
