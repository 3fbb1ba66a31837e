//! The location acquisition service.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::permissions::{ensure_foreground, negotiate, PermissionStatus};
use super::provider::{
    Accuracy, BackgroundTaskOptions, LocationProvider, Position, WatchId, WatchOptions,
};
use super::tracking::{LocationSample, LocationSource, TrackingMode};
use super::{LocationError, LocationResult};
use crate::config::LocationConfig;
use crate::store::{DocumentStore, SetOptions, EMERGENCY_LOCATIONS, USERS};

/// Capacity of the channel between the provider and a persisting task.
const POSITION_BUFFER: usize = 32;

/// One way of getting the device tracked, most capable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Negotiate permissions, watch in the foreground, add a background task
    /// when allowed.
    Full,
    /// Foreground watch on the permission state already known, no prompts.
    Smart,
    /// Low-accuracy foreground watch, attempted directly.
    Basic,
}

impl Strategy {
    /// The order [`LocationService::start_location_tracking`] tries them in.
    pub const CHAIN: [Strategy; 3] = [Strategy::Full, Strategy::Smart, Strategy::Basic];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Smart => "smart",
            Self::Basic => "basic",
        })
    }
}

/// Which strategy got tracking going and what is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingOutcome {
    /// Strategy that succeeded.
    pub strategy: Strategy,
    /// A foreground watch is running.
    pub foreground: bool,
    /// A background task is registered.
    pub background: bool,
}

/// Snapshot of the service's tracking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingState {
    /// A foreground watch is running.
    pub foreground: bool,
    /// A background task is registered.
    pub background: bool,
    /// Mode the next watch will use.
    pub mode: TrackingMode,
    /// Emergency mode is on.
    pub emergency: bool,
}

struct ForegroundWatch {
    id: WatchId,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    permissions: Option<PermissionStatus>,
    mode: TrackingMode,
    emergency: bool,
    foreground: Option<ForegroundWatch>,
    background: Option<JoinHandle<()>>,
}

/// Caches and persists every sample for one user.
#[derive(Debug)]
struct Recorder {
    store: Arc<dyn DocumentStore>,
    user_id: String,
    last_known: Mutex<Option<LocationSample>>,
}

impl Recorder {
    /// Cache the sample, then mirror it to the store.
    ///
    /// Store failures are logged; the cached copy stays.
    async fn record(&self, sample: LocationSample) {
        *lock(&self.last_known) = Some(sample);
        trace!(user = %self.user_id, source = ?sample.source, "Location sample");

        let profile = json!({
            "location": sample,
            "lastLocationUpdate": sample.timestamp,
        });
        if let Err(e) = self
            .store
            .set_document(USERS, &self.user_id, profile, SetOptions::merge())
            .await
        {
            warn!(user = %self.user_id, error = %e, "Failed to save location to profile");
        }

        let mut emergency = json!(sample);
        emergency["userId"] = json!(self.user_id);
        if let Err(e) = self
            .store
            .set_document(EMERGENCY_LOCATIONS, &self.user_id, emergency, SetOptions::replace())
            .await
        {
            warn!(user = %self.user_id, error = %e, "Failed to save emergency location");
        }
    }

    fn spawn_pump(
        self: &Arc<Self>,
        mut updates: mpsc::Receiver<Position>,
        source: LocationSource,
    ) -> JoinHandle<()> {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(position) = updates.recv().await {
                recorder.record(LocationSample::new(position, source)).await;
            }
            debug!(user = %recorder.user_id, ?source, "Location updates ended");
        })
    }
}

/// Acquires and tracks one user's device location.
///
/// Permission state, the running foreground watch and the background task
/// registration all live here. Positions from every source are cached in
/// memory and written to the user's profile and emergency location record.
pub struct LocationService {
    provider: Arc<dyn LocationProvider>,
    recorder: Arc<Recorder>,
    config: LocationConfig,
    state: Mutex<State>,
}

impl fmt::Debug for LocationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationService")
            .field("user_id", &self.recorder.user_id)
            .field("state", &self.tracking_state())
            .finish_non_exhaustive()
    }
}

impl LocationService {
    /// Create a service tracking `user_id`'s device.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        store: Arc<dyn DocumentStore>,
        user_id: impl Into<String>,
        config: LocationConfig,
    ) -> Self {
        let state = State {
            mode: config.default_mode,
            ..State::default()
        };
        Self {
            provider,
            recorder: Arc::new(Recorder {
                store,
                user_id: user_id.into(),
                last_known: Mutex::new(None),
            }),
            config,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Negotiate permissions and remember the result.
    ///
    /// # Errors
    ///
    /// Returns an error only if the services check fails.
    pub async fn request_permissions(&self) -> LocationResult<PermissionStatus> {
        let status = negotiate(self.provider.as_ref(), self.config.permission_timeout()).await?;
        self.state().permissions = Some(status);
        Ok(status)
    }

    /// The last negotiated permission state.
    #[must_use]
    pub fn permission_status(&self) -> Option<PermissionStatus> {
        self.state().permissions
    }

    /// Select the tracking mode used when emergency mode is off.
    ///
    /// Applies from the next watch started; a running watch keeps its
    /// parameters.
    pub fn set_tracking_mode(&self, mode: TrackingMode) {
        self.state().mode = mode;
        debug!(%mode, "Tracking mode selected");
    }

    /// Switch emergency mode on or off. Applies from the next watch started.
    pub fn set_emergency_mode(&self, enabled: bool) {
        self.state().emergency = enabled;
        info!(enabled, "Emergency mode changed");
    }

    /// The mode the next watch will use.
    #[must_use]
    pub fn tracking_mode(&self) -> TrackingMode {
        let state = self.state();
        if state.emergency {
            TrackingMode::Emergency
        } else {
            state.mode
        }
    }

    /// Whether a foreground watch or background task is active.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        let state = self.state();
        state.foreground.is_some() || state.background.is_some()
    }

    /// What is currently running.
    #[must_use]
    pub fn tracking_state(&self) -> TrackingState {
        let state = self.state();
        TrackingState {
            foreground: state.foreground.is_some(),
            background: state.background.is_some(),
            mode: if state.emergency {
                TrackingMode::Emergency
            } else {
                state.mode
            },
            emergency: state.emergency,
        }
    }

    /// Background task parameters for the current mode.
    #[must_use]
    pub fn background_options(&self) -> BackgroundTaskOptions {
        BackgroundTaskOptions {
            watch: self.tracking_mode().watch_options(),
            deferred_distance_m: self.config.background_deferred_distance_m,
            deferred_interval: self.config.background_deferred_interval(),
        }
    }

    /// Start a continuous foreground watch, replacing any running one.
    ///
    /// Every position is cached and written to the store.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if the watch cannot start.
    pub async fn start_foreground_tracking(&self, options: WatchOptions) -> LocationResult<()> {
        let (sender, receiver) = mpsc::channel(POSITION_BUFFER);
        let id = self.provider.watch_position(options, sender).await?;
        let pump = self.recorder.spawn_pump(receiver, LocationSource::Foreground);

        let previous = self.state().foreground.replace(ForegroundWatch { id, pump });
        if let Some(previous) = previous {
            self.release_watch(previous).await;
        }
        info!(%id, accuracy = ?options.accuracy, "Foreground tracking started");
        Ok(())
    }

    /// Register the OS background task.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` without background permission, or the
    /// provider's error if registration fails.
    pub async fn start_background_tracking(
        &self,
        options: BackgroundTaskOptions,
    ) -> LocationResult<()> {
        let known = self.state().permissions.map(|p| p.background);
        let allowed = match known {
            Some(allowed) => allowed,
            None => self.provider.get_background_permission().await?,
        };
        if !allowed {
            return Err(LocationError::PermissionDenied);
        }

        let previous = self.state().background.take();
        if let Some(previous) = previous {
            previous.abort();
            self.unregister_background().await;
        }

        let (sender, receiver) = mpsc::channel(POSITION_BUFFER);
        self.provider
            .register_background_task(&self.config.background_task_id, options, sender)
            .await?;
        let pump = self.recorder.spawn_pump(receiver, LocationSource::Background);
        if let Some(raced) = self.state().background.replace(pump) {
            raced.abort();
        }
        info!(task = %self.config.background_task_id, "Background tracking registered");
        Ok(())
    }

    /// Get the device tracked by the first strategy that works.
    ///
    /// Tries [`Strategy::CHAIN`] in order. Disabled location services end the
    /// chain at once, since no strategy can work around them.
    ///
    /// # Errors
    ///
    /// Returns the first strategy's failure when every strategy fails.
    pub async fn start_location_tracking(&self) -> LocationResult<TrackingOutcome> {
        let mut primary: Option<LocationError> = None;
        for strategy in Strategy::CHAIN {
            let attempt = match strategy {
                Strategy::Full => self.start_full_tracking().await,
                Strategy::Smart => self.start_smart_tracking().await,
                Strategy::Basic => self.start_basic_tracking().await,
            };
            match attempt {
                Ok(outcome) => return Ok(outcome),
                Err(LocationError::ServicesDisabled) => {
                    return Err(LocationError::ServicesDisabled);
                }
                Err(e) => {
                    warn!(%strategy, error = %e, "Tracking strategy failed");
                    primary.get_or_insert(e);
                }
            }
        }
        Err(primary.unwrap_or_else(|| LocationError::Unknown("no tracking strategy".to_string())))
    }

    async fn start_full_tracking(&self) -> LocationResult<TrackingOutcome> {
        let status = self.request_permissions().await?;
        if let Some(e) = status.foreground_error() {
            return Err(e);
        }

        self.start_foreground_tracking(self.tracking_mode().watch_options())
            .await?;

        let background = if status.background {
            match self.start_background_tracking(self.background_options()).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Background tracking unavailable");
                    false
                }
            }
        } else {
            debug!("No background permission, tracking in foreground only");
            false
        };

        Ok(TrackingOutcome {
            strategy: Strategy::Full,
            foreground: true,
            background,
        })
    }

    /// Start a foreground watch without prompting.
    ///
    /// Trusts a remembered foreground grant; otherwise checks the current
    /// permission state, which may have changed behind a prompt that never
    /// answered.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` without foreground permission, or the
    /// provider's error.
    pub async fn start_smart_tracking(&self) -> LocationResult<TrackingOutcome> {
        let remembered = self.state().permissions.is_some_and(|p| p.foreground);
        if !remembered {
            let granted = tokio::time::timeout(
                self.config.permission_timeout(),
                self.provider.get_foreground_permission(),
            )
            .await
            .map_err(|_| LocationError::timeout("foreground permission check"))??;
            if !granted {
                return Err(LocationError::PermissionDenied);
            }
        }

        self.start_foreground_tracking(self.tracking_mode().watch_options())
            .await?;
        Ok(TrackingOutcome {
            strategy: Strategy::Smart,
            foreground: true,
            background: false,
        })
    }

    /// Start a low-accuracy foreground watch directly.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if the watch cannot start.
    pub async fn start_basic_tracking(&self) -> LocationResult<TrackingOutcome> {
        let options = WatchOptions {
            accuracy: Accuracy::Low,
            ..self.tracking_mode().watch_options()
        };
        self.start_foreground_tracking(options).await?;
        Ok(TrackingOutcome {
            strategy: Strategy::Basic,
            foreground: true,
            background: false,
        })
    }

    /// Fetch one position now.
    ///
    /// Needs foreground permission only and prompts for it if necessary. The
    /// fix is cached and written to the store; store failures are logged.
    ///
    /// # Errors
    ///
    /// Returns `ServicesDisabled`, `PermissionDenied`, `Timeout`, or the
    /// provider's error.
    pub async fn get_current_location(&self) -> LocationResult<LocationSample> {
        ensure_foreground(self.provider.as_ref(), self.config.permission_timeout()).await?;

        let limit = self.config.current_location_timeout();
        let accuracy = self.tracking_mode().watch_options().accuracy;
        let position = tokio::time::timeout(
            limit,
            self.provider
                .get_current_position(accuracy, limit, self.config.max_location_age()),
        )
        .await
        .map_err(|_| LocationError::timeout("current position"))??;

        let sample = LocationSample::new(position, LocationSource::Foreground);
        self.recorder.record(sample).await;
        Ok(sample)
    }

    /// The most recent sample, however old.
    ///
    /// Callers that need a fresh position compare its timestamp against their
    /// own threshold, see [`super::is_fresh`].
    #[must_use]
    pub fn get_last_known_location(&self) -> Option<LocationSample> {
        *lock(&self.recorder.last_known)
    }

    /// Seed the cache from the user's stored emergency location.
    ///
    /// Does nothing if a sample is already cached or none is stored.
    pub async fn restore_last_known(&self) -> Option<LocationSample> {
        if let Some(sample) = self.get_last_known_location() {
            return Some(sample);
        }
        let stored = match self
            .recorder
            .store
            .get_document(EMERGENCY_LOCATIONS, &self.recorder.user_id)
            .await
        {
            Ok(stored) => stored?,
            Err(e) => {
                warn!(user = %self.recorder.user_id, error = %e, "Failed to read stored location");
                return None;
            }
        };
        let mut sample: LocationSample = match serde_json::from_value(stored) {
            Ok(sample) => sample,
            Err(e) => {
                debug!(user = %self.recorder.user_id, error = %e, "Stored location unreadable");
                return None;
            }
        };
        sample.source = LocationSource::Cached;

        let mut cached = lock(&self.recorder.last_known);
        Some(*cached.get_or_insert(sample))
    }

    /// Stop all tracking.
    ///
    /// Clearing a missing watch is a no-op. The background task is always
    /// asked to unregister, since it may have been registered by an earlier
    /// run; failures there are logged and swallowed.
    pub async fn stop_location_tracking(&self) {
        let (foreground, background) = {
            let mut state = self.state();
            (state.foreground.take(), state.background.take())
        };

        if let Some(watch) = foreground {
            self.release_watch(watch).await;
            info!("Foreground tracking stopped");
        }

        if let Some(pump) = background {
            pump.abort();
        }
        self.unregister_background().await;
    }

    async fn unregister_background(&self) {
        match self
            .provider
            .unregister_background_task(&self.config.background_task_id)
            .await
        {
            Ok(()) => debug!(task = %self.config.background_task_id, "Background task unregistered"),
            Err(e) => debug!(error = %e, "Background task not stopped"),
        }
    }

    async fn release_watch(&self, watch: ForegroundWatch) {
        watch.pump.abort();
        if let Err(e) = self.provider.clear_watch(watch.id).await {
            warn!(id = %watch.id, error = %e, "Failed to clear location watch");
        }
    }
}

impl Drop for LocationService {
    fn drop(&mut self) {
        let state = lock(&self.state);
        if let Some(watch) = &state.foreground {
            watch.pump.abort();
        }
        if let Some(pump) = &state.background {
            pump.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
