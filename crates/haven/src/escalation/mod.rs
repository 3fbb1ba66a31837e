//! Automatic status escalation.
//!
//! A member who answered "I'm Safe" (or any other response) and then goes
//! quiet is moved to "Not Yet Responded" two hours after their last manual
//! update, and to "Unknown" eight hours after it. The engine keeps one timer
//! per member of every monitored family, re-reconciles them on every family
//! snapshot, and writes escalations back through the document store.
//!
//! Deadlines are derived from the member's `lastUpdate`, which escalation
//! never modifies. Re-observing a member therefore reproduces the same
//! deadline, and a snapshot can be applied any number of times.

mod timers;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::EscalationConfig;
use crate::error::Result;
use crate::family::{Family, Member};
use crate::location::{is_fresh, LocationSample};
use crate::status::{EscalationStage, SafetyStatus, StatusKind};
use crate::store::{Document, DocumentStore, DocumentWatch, EMERGENCY_LOCATIONS, FAMILIES};

pub use timers::ArmedTimer;
use timers::{Claim, Schedule, TimerRegistry};

/// Result of an escalation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// The new status was written.
    Applied,
    /// Nothing was written.
    Skipped(SkipReason),
}

/// Why an escalation was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The family document no longer exists.
    FamilyMissing,
    /// The family was archived.
    FamilyArchived,
    /// The user left the family.
    MemberMissing,
    /// The member's status is no longer the one this step escalates from.
    StatusChanged,
    /// The member updated manually after the timer was armed.
    Superseded,
    /// Monitoring of the family stopped while the timer was firing.
    MonitoringStopped,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FamilyMissing => "family missing",
            Self::FamilyArchived => "family archived",
            Self::MemberMissing => "member missing",
            Self::StatusChanged => "status changed",
            Self::Superseded => "superseded by a manual update",
            Self::MonitoringStopped => "monitoring stopped",
        })
    }
}

/// The status escalation engine.
///
/// Cloning is cheap and yields a handle to the same engine.
#[derive(Clone)]
pub struct EscalationEngine {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: EscalationConfig,
    timers: TimerRegistry,
    monitors: Mutex<Monitors>,
}

/// One monitored family.
///
/// Timers remember the session they were armed in and act only while it is
/// still the family's current one.
struct Monitor {
    session: u64,
    listener: JoinHandle<()>,
}

#[derive(Default)]
struct Monitors {
    families: HashMap<String, Monitor>,
    next_session: u64,
}

/// What a firing timer expects to still hold when it writes.
#[derive(Clone, Copy)]
struct Expected {
    session: u64,
    basis: DateTime<Utc>,
}

impl fmt::Debug for EscalationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscalationEngine")
            .field("families", &self.monitored_families())
            .field("timers", &self.inner.timers.len())
            .finish_non_exhaustive()
    }
}

impl EscalationEngine {
    /// Create an engine writing through `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: EscalationConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                config,
                timers: TimerRegistry::default(),
                monitors: Mutex::new(Monitors::default()),
            }),
        }
    }

    /// Start monitoring a family.
    ///
    /// Arms timers for `members`, then follows the family document and
    /// reconciles timers on every snapshot. Calling this for a family that is
    /// already monitored does nothing.
    ///
    /// Returns whether monitoring was started by this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be opened.
    pub async fn initialize_monitoring(&self, family_code: &str, members: &[Member]) -> Result<bool> {
        if self.is_monitoring(family_code) {
            debug!(family = family_code, "Already monitoring");
            return Ok(false);
        }

        let updates = self.inner.store.subscribe(FAMILIES, family_code).await?;

        {
            let mut monitors = self.inner.monitors();
            if monitors.families.contains_key(family_code) {
                return Ok(false);
            }
            monitors.next_session += 1;
            let session = monitors.next_session;
            let listener = tokio::spawn(listen(
                Arc::downgrade(&self.inner),
                family_code.to_string(),
                updates,
            ));
            monitors
                .families
                .insert(family_code.to_string(), Monitor { session, listener });
        }
        for member in members {
            self.inner.arm_or_skip(member, family_code);
        }

        info!(family = family_code, members = members.len(), "Monitoring started");
        Ok(true)
    }

    /// Reconcile one member's timer with its current state.
    ///
    /// A responded member gets a timer for "Not Yet Responded" at
    /// `lastUpdate + 2h`, unless an identical timer is already armed. A member
    /// moved to "Not Yet Responded" by the engine keeps its pending "Unknown"
    /// timer. Every other member has no timer. Nothing is armed for a family
    /// that is not being monitored.
    pub fn arm_or_skip(&self, member: &Member, family_code: &str) {
        self.inner.arm_or_skip(member, family_code);
    }

    /// Escalate a member to `new_status` with a read-modify-write of the
    /// family document.
    ///
    /// Only the step the cascade would take is applied: "Not Yet Responded"
    /// from a responded status, "Unknown" from "Not Yet Responded". Anything
    /// else is skipped, as is a family that was deleted or archived or a user
    /// who left.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read or write fails.
    pub async fn apply_escalation(
        &self,
        user_id: &str,
        family_code: &str,
        new_status: SafetyStatus,
        reason: &str,
    ) -> Result<EscalationOutcome> {
        let stage = match new_status.kind() {
            StatusKind::NotYetResponded => EscalationStage::ToNotYetResponded,
            StatusKind::Unknown => EscalationStage::ToUnknown,
            StatusKind::Responded => {
                return Ok(EscalationOutcome::Skipped(SkipReason::StatusChanged));
            }
        };
        self.inner
            .escalate(user_id, family_code, stage, reason, None)
            .await
    }

    /// Cancel the member's pending timers. Returns whether one was armed.
    pub fn reset_timer_for_user(&self, user_id: &str, family_code: &str) -> bool {
        let cancelled = self.inner.timers.cancel(family_code, user_id);
        if cancelled {
            debug!(family = family_code, user = user_id, "Timer reset");
        }
        cancelled
    }

    /// Stop monitoring a family: detach its listener and cancel its timers.
    ///
    /// Returns whether the family was being monitored.
    pub fn stop_monitoring(&self, family_code: &str) -> bool {
        let (monitor, cancelled) = {
            let mut monitors = self.inner.monitors();
            let monitor = monitors.families.remove(family_code);
            (monitor, self.inner.timers.cancel_family(family_code))
        };
        match monitor {
            Some(monitor) => {
                monitor.listener.abort();
                info!(family = family_code, cancelled, "Monitoring stopped");
                true
            }
            None => false,
        }
    }

    /// Stop monitoring every family.
    pub fn shutdown(&self) {
        let families = self.monitored_families();
        for family in &families {
            self.stop_monitoring(family);
        }
        let stray = self.inner.timers.cancel_all();
        info!(families = families.len(), stray, "Escalation engine shut down");
    }

    /// Whether a family is being monitored.
    #[must_use]
    pub fn is_monitoring(&self, family_code: &str) -> bool {
        self.inner.monitors().families.contains_key(family_code)
    }

    /// Codes of all monitored families, sorted.
    #[must_use]
    pub fn monitored_families(&self) -> Vec<String> {
        let mut families: Vec<String> = self.inner.monitors().families.keys().cloned().collect();
        families.sort();
        families
    }

    /// Live timers of a family, ordered by user.
    #[must_use]
    pub fn armed_timers(&self, family_code: &str) -> Vec<ArmedTimer> {
        self.inner.timers.family(family_code)
    }
}

impl Inner {
    fn monitors(&self) -> MutexGuard<'_, Monitors> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self, family: &str) -> Option<u64> {
        self.monitors().families.get(family).map(|m| m.session)
    }

    fn arm_or_skip(self: &Arc<Self>, member: &Member, family: &str) {
        let user = member.user_id.as_str();
        let basis = member.last_update;
        let kind = member.status.kind();

        match EscalationStage::starting_from(kind) {
            Some(stage) => {
                if self.timers.matches(family, user, stage, basis) {
                    return;
                }
                let Some(session) = self.session(family) else {
                    debug!(family, user, "Family not monitored, no timer armed");
                    return;
                };
                let schedule = Schedule {
                    stage,
                    deadline: basis + stage.offset(&self.config),
                    basis,
                };
                self.arm(family, user, schedule, session, true);
            }
            None if member.auto_updated
                && kind == EscalationStage::ToUnknown.required_kind()
                && self
                    .timers
                    .matches(family, user, EscalationStage::ToUnknown, basis) => {}
            None => {
                if self.timers.cancel(family, user) {
                    debug!(family, user, status = %member.status, "Timer cleared");
                }
            }
        }
    }

    /// Arm a timer within `session`.
    ///
    /// The registry is updated under the monitors lock, so a timer can never
    /// be armed for a session that `stop_monitoring` already ended.
    fn arm(self: &Arc<Self>, family: &str, user: &str, schedule: Schedule, session: u64, replace: bool) {
        let delay = (schedule.deadline - self.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let weak = Arc::downgrade(self);

        let monitors = self.monitors();
        if monitors.families.get(family).map(|m| m.session) != Some(session) {
            debug!(family, user, stage = %schedule.stage, "Monitoring stopped, timer not armed");
            return;
        }
        let armed = self.timers.arm(family, user, schedule, replace, |generation| {
            tokio::spawn(fire(
                weak,
                family.to_string(),
                user.to_string(),
                Firing { generation, session },
                delay,
            ))
        });
        drop(monitors);

        if armed {
            debug!(family, user, stage = %schedule.stage, deadline = %schedule.deadline, "Timer armed");
        }
    }

    fn reconcile(self: &Arc<Self>, family: &str, snapshot: Option<&Document>) {
        let Some(document) = snapshot else {
            let cancelled = self.timers.cancel_family(family);
            info!(family, cancelled, "Family deleted, timers cleared");
            return;
        };
        let family_doc = match Family::from_document(family, document) {
            Ok(family_doc) => family_doc,
            Err(e) => {
                warn!(family, error = %e, "Ignoring unreadable family snapshot");
                return;
            }
        };
        if family_doc.is_archived {
            let cancelled = self.timers.cancel_family(family);
            info!(family, cancelled, "Family archived, timers cleared");
            return;
        }

        let present: HashSet<&str> = family_doc.members.iter().map(|m| m.user_id.as_str()).collect();
        for user in self.timers.cancel_absent(family, &present) {
            info!(family, user, "Member left, timer cleared");
        }
        for member in &family_doc.members {
            self.arm_or_skip(member, family);
        }
    }

    async fn on_deadline(self: &Arc<Self>, family: &str, user: &str, claim: Claim, session: u64) {
        let Claim { stage, basis } = claim;

        if stage == EscalationStage::ToUnknown && self.config.defer_unknown_when_located {
            if let Some(sample) = self.fresh_location(user).await {
                let deadline = self.clock.now() + self.config.location_fresh();
                info!(family, user, located_at = %sample.timestamp, %deadline, "Fresh location, deferring Unknown");
                let schedule = Schedule {
                    stage,
                    deadline,
                    basis,
                };
                self.arm(family, user, schedule, session, false);
                return;
            }
        }

        let expected = Expected { session, basis };
        match self
            .escalate(user, family, stage, stage.reason(), Some(expected))
            .await
        {
            Ok(EscalationOutcome::Applied) => {
                info!(family, user, status = %stage.target(), "Status escalated");
                if let Some(next) = stage.next() {
                    let schedule = Schedule {
                        stage: next,
                        deadline: basis + next.offset(&self.config),
                        basis,
                    };
                    self.arm(family, user, schedule, session, false);
                }
            }
            Ok(EscalationOutcome::Skipped(reason)) => {
                info!(family, user, %stage, %reason, "Escalation skipped");
            }
            Err(e) => {
                error!(family, user, %stage, error = %e, "Escalation write failed, not retrying");
            }
        }
    }

    async fn escalate(
        &self,
        user: &str,
        family: &str,
        stage: EscalationStage,
        reason: &str,
        expected: Option<Expected>,
    ) -> Result<EscalationOutcome> {
        let Some(document) = self.store.get_document(FAMILIES, family).await? else {
            return Ok(EscalationOutcome::Skipped(SkipReason::FamilyMissing));
        };
        let mut family_doc = Family::from_document(family, &document)?;
        if family_doc.is_archived {
            return Ok(EscalationOutcome::Skipped(SkipReason::FamilyArchived));
        }

        let now = self.clock.now();
        let Some(member) = family_doc.member_mut(user) else {
            return Ok(EscalationOutcome::Skipped(SkipReason::MemberMissing));
        };
        if member.status.kind() != stage.required_kind() {
            return Ok(EscalationOutcome::Skipped(SkipReason::StatusChanged));
        }
        if let Some(expected) = expected {
            if expected.basis != member.last_update {
                return Ok(EscalationOutcome::Skipped(SkipReason::Superseded));
            }
            // Stop may have happened while the family was being read.
            if self.session(family) != Some(expected.session) {
                return Ok(EscalationOutcome::Skipped(SkipReason::MonitoringStopped));
            }
        }
        member.apply_escalation(stage.target(), reason, now);

        // Whole-list write: a concurrent update from another device between
        // the read above and this write is lost.
        let members = serde_json::to_value(&family_doc.members)?;
        match self
            .store
            .update_document(FAMILIES, family, json!({ "members": members }))
            .await
        {
            Ok(()) => Ok(EscalationOutcome::Applied),
            Err(e) if e.is_not_found() => Ok(EscalationOutcome::Skipped(SkipReason::FamilyMissing)),
            Err(e) => Err(e),
        }
    }

    async fn fresh_location(&self, user: &str) -> Option<LocationSample> {
        let document = match self.store.get_document(EMERGENCY_LOCATIONS, user).await {
            Ok(document) => document?,
            Err(e) => {
                warn!(user, error = %e, "Could not read emergency location");
                return None;
            }
        };
        let sample: LocationSample = match serde_json::from_value(document) {
            Ok(sample) => sample,
            Err(e) => {
                debug!(user, error = %e, "Unreadable emergency location");
                return None;
            }
        };
        is_fresh(&sample, self.clock.now(), self.config.location_fresh()).then_some(sample)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, monitor) in self.monitors().families.drain() {
            monitor.listener.abort();
        }
        self.timers.cancel_all();
    }
}

async fn listen(engine: Weak<Inner>, family: String, mut updates: DocumentWatch) {
    loop {
        let snapshot = updates.borrow_and_update().clone();
        {
            let Some(inner) = engine.upgrade() else {
                return;
            };
            inner.reconcile(&family, snapshot.as_ref());
        }
        if updates.changed().await.is_err() {
            debug!(family, "Family stream closed");
            return;
        }
    }
}

/// Identifies a spawned timer: its registry generation and the monitoring
/// session it belongs to.
#[derive(Clone, Copy)]
struct Firing {
    generation: u64,
    session: u64,
}

async fn fire(
    engine: Weak<Inner>,
    family: String,
    user: String,
    firing: Firing,
    delay: std::time::Duration,
) {
    tokio::time::sleep(delay).await;
    let Some(inner) = engine.upgrade() else {
        return;
    };
    let Some(claim) = inner.timers.claim(&family, &user, firing.generation) else {
        return;
    };
    inner.on_deadline(&family, &user, claim, firing.session).await;
}
