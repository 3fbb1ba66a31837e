//! Location acquisition.
//!
//! The device side of the engine: negotiating OS location permissions,
//! running foreground watches and background tasks, and keeping the most
//! recent position around for the escalation engine to consult.
//!
//! The OS itself sits behind [`LocationProvider`]. Everything here fails with a
//! typed [`LocationError`] so callers can degrade per reason.

mod permissions;
mod provider;
mod service;
mod tracking;

use thiserror::Error;

pub use permissions::{ensure_foreground, negotiate, PermissionStatus};
pub use provider::{Accuracy, BackgroundTaskOptions, LocationProvider, Position, WatchId, WatchOptions};
pub use service::{LocationService, Strategy, TrackingOutcome, TrackingState};
pub use tracking::{is_fresh, LocationSample, LocationSource, TrackingMode};

/// Why a location operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    /// The user or the OS refused the capability.
    #[error("location permission denied")]
    PermissionDenied,

    /// A permission or position request did not answer in time.
    #[error("{operation} timed out")]
    Timeout {
        /// What was being waited on.
        operation: String,
    },

    /// Location services are switched off at the OS level.
    #[error("location services are disabled")]
    ServicesDisabled,

    /// Anything the provider reported that fits none of the above.
    #[error("location unavailable: {0}")]
    Unknown(String),
}

impl LocationError {
    /// Create a timeout error for the named operation.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}

/// Result type for location operations.
pub type LocationResult<T> = std::result::Result<T, LocationError>;
