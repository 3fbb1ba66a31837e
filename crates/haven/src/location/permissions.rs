//! Location permission negotiation.
//!
//! Permission prompts are OS dialogs that can stay open forever, so every
//! call into the provider here is bounded by a caller-side timeout. A request
//! that times out counts as a denial for this attempt; nothing is retried
//! until the next explicit call.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::provider::LocationProvider;
use super::{LocationError, LocationResult};

/// Outcome of a permission negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionStatus {
    /// Location services are on.
    pub services_enabled: bool,
    /// Foreground location is granted.
    pub foreground: bool,
    /// Background location is granted.
    pub background: bool,
    /// A permission request gave up waiting for an answer.
    pub timed_out: bool,
}

impl PermissionStatus {
    /// Services are off; nothing was asked.
    #[must_use]
    pub fn services_disabled() -> Self {
        Self::default()
    }

    /// Foreground and background both granted.
    #[must_use]
    pub fn granted() -> Self {
        Self {
            services_enabled: true,
            foreground: true,
            background: true,
            timed_out: false,
        }
    }

    /// Human-readable description of the status.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match (self.services_enabled, self.foreground, self.background) {
            (false, _, _) => "location services are disabled",
            (true, false, _) if self.timed_out => "foreground permission request timed out",
            (true, false, _) => "foreground location is not granted",
            (true, true, false) => "foreground location only",
            (true, true, true) => "foreground and background location granted",
        }
    }

    /// The error a caller needing foreground access should report.
    ///
    /// `None` when foreground access is available.
    #[must_use]
    pub fn foreground_error(&self) -> Option<LocationError> {
        if !self.services_enabled {
            Some(LocationError::ServicesDisabled)
        } else if self.foreground {
            None
        } else if self.timed_out {
            Some(LocationError::timeout("foreground permission request"))
        } else {
            Some(LocationError::PermissionDenied)
        }
    }
}

/// Bound a provider call by `limit`.
async fn bounded<F>(operation: &str, limit: Duration, call: F) -> LocationResult<bool>
where
    F: Future<Output = LocationResult<bool>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = limit.as_millis(), "Permission call timed out");
            Err(LocationError::timeout(operation))
        }
    }
}

/// Check a permission, prompting only if it is not already granted.
///
/// Provider errors on the prompt are treated as a denial.
async fn check_then_request<C, R>(
    name: &str,
    limit: Duration,
    check: C,
    request: R,
) -> LocationResult<bool>
where
    C: Future<Output = LocationResult<bool>>,
    R: Future<Output = LocationResult<bool>>,
{
    match bounded(&format!("{name} permission check"), limit, check).await {
        Ok(true) => {
            debug!(permission = name, "Already granted");
            return Ok(true);
        }
        Ok(false) => {}
        Err(e) => debug!(permission = name, error = %e, "Permission check failed, prompting"),
    }

    match bounded(&format!("{name} permission request"), limit, request).await {
        Ok(granted) => Ok(granted),
        Err(e @ LocationError::Timeout { .. }) => Err(e),
        Err(e) => {
            warn!(permission = name, error = %e, "Permission request failed");
            Ok(false)
        }
    }
}

/// Run the full permission negotiation.
///
/// Steps short-circuit: with services off nothing is asked, and background
/// permission is only asked for once foreground permission is held.
/// Background permission is optional and its absence is not an error.
///
/// # Errors
///
/// Returns an error only if the services check itself fails.
pub async fn negotiate(
    provider: &dyn LocationProvider,
    limit: Duration,
) -> LocationResult<PermissionStatus> {
    let services_enabled = bounded("services check", limit, provider.has_services_enabled()).await?;
    if !services_enabled {
        info!("Location services disabled, not prompting");
        return Ok(PermissionStatus::services_disabled());
    }

    let mut status = PermissionStatus {
        services_enabled,
        ..PermissionStatus::default()
    };

    match check_then_request(
        "foreground",
        limit,
        provider.get_foreground_permission(),
        provider.request_foreground_permission(),
    )
    .await
    {
        Ok(granted) => status.foreground = granted,
        Err(_) => status.timed_out = true,
    }
    if !status.foreground {
        info!(timed_out = status.timed_out, "Foreground location not granted");
        return Ok(status);
    }

    match check_then_request(
        "background",
        limit,
        provider.get_background_permission(),
        provider.request_background_permission(),
    )
    .await
    {
        Ok(granted) => status.background = granted,
        Err(_) => status.timed_out = true,
    }

    info!(
        foreground = status.foreground,
        background = status.background,
        "Location permissions negotiated"
    );
    Ok(status)
}

/// Make sure foreground location is available, prompting if needed.
///
/// Never touches background permission.
///
/// # Errors
///
/// Returns `ServicesDisabled`, `PermissionDenied` or `Timeout`.
pub async fn ensure_foreground(
    provider: &dyn LocationProvider,
    limit: Duration,
) -> LocationResult<()> {
    if !bounded("services check", limit, provider.has_services_enabled()).await? {
        return Err(LocationError::ServicesDisabled);
    }
    if check_then_request(
        "foreground",
        limit,
        provider.get_foreground_permission(),
        provider.request_foreground_permission(),
    )
    .await?
    {
        Ok(())
    } else {
        Err(LocationError::PermissionDenied)
    }
}
