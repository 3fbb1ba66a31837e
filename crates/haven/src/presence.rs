//! Family presence for one signed-in user.
//!
//! The synchronizer follows the user's family document, keeps an enriched
//! roster (member entries joined with profile names, phones and locations)
//! for display, and keeps the escalation engine monitoring the family. Manual
//! status updates go through here so the document write and the timer reset
//! always happen together.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::escalation::EscalationEngine;
use crate::family::{derive_family_code, validate_family_code, Family, Member};
use crate::location::LocationSample;
use crate::status::SafetyStatus;
use crate::store::{DocumentStore, DocumentWatch, SetOptions, FAMILIES, USERS};

/// Codes tried before giving up on creating a family.
const MAX_CODE_ATTEMPTS: u32 = 16;

/// A member entry joined with the member's profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterMember {
    /// The member entry from the family document.
    #[serde(flatten)]
    pub member: Member,
    /// Display name from the profile.
    pub name: Option<String>,
    /// Phone number from the profile.
    pub phone: Option<String>,
    /// Last location the member's device reported.
    pub location: Option<LocationSample>,
}

struct Attachment {
    code: String,
    detached: Arc<AtomicBool>,
    follower: JoinHandle<()>,
}

impl Attachment {
    /// Stop the follower. Returns the family code.
    ///
    /// The flag is raised before the abort: a follower still running between
    /// two awaits sees it once its current step finishes.
    fn end(self) -> String {
        self.detached.store(true, Ordering::SeqCst);
        self.follower.abort();
        self.code
    }
}

/// Bridges one user's family document to the escalation engine.
pub struct PresenceSynchronizer {
    store: Arc<dyn DocumentStore>,
    engine: EscalationEngine,
    clock: Arc<dyn Clock>,
    user_id: String,
    roster: Arc<watch::Sender<Vec<RosterMember>>>,
    attachment: Mutex<Option<Attachment>>,
}

impl fmt::Debug for PresenceSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceSynchronizer")
            .field("user_id", &self.user_id)
            .field("family", &self.family_code())
            .finish_non_exhaustive()
    }
}

impl PresenceSynchronizer {
    /// Create a synchronizer for the signed-in `user_id`.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        engine: EscalationEngine,
        clock: Arc<dyn Clock>,
        user_id: impl Into<String>,
    ) -> Self {
        let (roster, _) = watch::channel(Vec::new());
        Self {
            store,
            engine,
            clock,
            user_id: user_id.into(),
            roster: Arc::new(roster),
            attachment: Mutex::new(None),
        }
    }

    fn attachment(&self) -> MutexGuard<'_, Option<Attachment>> {
        self.attachment.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The signed-in user.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Code of the attached family.
    #[must_use]
    pub fn family_code(&self) -> Option<String> {
        self.attachment().as_ref().map(|a| a.code.clone())
    }

    /// The enriched roster of the attached family.
    ///
    /// Empty while detached or when the family is archived or deleted.
    #[must_use]
    pub fn roster(&self) -> watch::Receiver<Vec<RosterMember>> {
        self.roster.subscribe()
    }

    /// Follow a family document.
    ///
    /// Every snapshot refreshes the roster and makes sure the engine is
    /// monitoring the family. Attaching to the already attached family does
    /// nothing; attaching elsewhere detaches first.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed code or if the subscription fails.
    pub async fn attach(&self, family_code: &str) -> Result<()> {
        validate_family_code(family_code)?;
        if self.family_code().as_deref() == Some(family_code) {
            return Ok(());
        }
        self.detach();

        let updates = self.store.subscribe(FAMILIES, family_code).await?;
        let detached = Arc::new(AtomicBool::new(false));
        let follower = tokio::spawn(follow(
            Follower {
                store: Arc::clone(&self.store),
                engine: self.engine.clone(),
                roster: Arc::clone(&self.roster),
                code: family_code.to_string(),
                detached: Arc::clone(&detached),
            },
            updates,
        ));

        let previous = self.attachment().replace(Attachment {
            code: family_code.to_string(),
            detached,
            follower,
        });
        if let Some(previous) = previous {
            // Lost a race with a concurrent attach.
            let code = previous.end();
            self.engine.stop_monitoring(&code);
        }
        info!(family = family_code, user = %self.user_id, "Attached to family");
        Ok(())
    }

    /// Stop following the family and stop monitoring it.
    pub fn detach(&self) {
        let Some(attachment) = self.attachment().take() else {
            return;
        };
        let code = attachment.end();
        self.engine.stop_monitoring(&code);
        self.roster.send_replace(Vec::new());
        info!(family = %code, "Detached from family");
    }

    /// Detach and shut the engine down. Used at sign-out.
    pub fn shutdown(&self) {
        self.detach();
        self.engine.shutdown();
    }

    /// Set the signed-in user's status in the attached family.
    ///
    /// Writes the status with `lastUpdate` set to now and any automatic
    /// escalation marks cleared, then restarts the member's escalation timer
    /// from this update.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached` without a family, a not-found error when the
    /// family, or the user's place in it, is gone, or the store error.
    pub async fn update_user_status(&self, status: SafetyStatus) -> Result<Member> {
        let code = self.family_code().ok_or(Error::NotAttached)?;
        let mut family = self.load_family(&code).await?;

        let now = self.clock.now();
        let member = family
            .member_mut(&self.user_id)
            .ok_or_else(|| Error::member_not_found(&code, &self.user_id))?;
        member.apply_manual(status, now);
        let updated = member.clone();

        // Whole-list write; see `EscalationEngine::apply_escalation`.
        self.write_members(&code, &family, None).await?;

        self.engine.reset_timer_for_user(&self.user_id, &code);
        self.engine.arm_or_skip(&updated, &code);
        info!(family = %code, user = %self.user_id, status = %updated.status, "Status updated");
        Ok(updated)
    }

    /// Create a family with the signed-in user as its admin.
    ///
    /// # Errors
    ///
    /// Returns an error if no unused code is found or the store fails.
    pub async fn create_family(&self, name: Option<String>) -> Result<Family> {
        let now = self.clock.now();
        for attempt in 0..MAX_CODE_ATTEMPTS {
            let code = derive_family_code(&self.user_id, now, attempt);
            if self.store.get_document(FAMILIES, &code).await?.is_some() {
                debug!(code, attempt, "Family code taken");
                continue;
            }

            let family = Family::new(&code, name, &self.user_id, now);
            self.store
                .set_document(FAMILIES, &code, family.to_document()?, SetOptions::replace())
                .await?;
            self.set_profile_family(Some(&code)).await;
            info!(family = %code, user = %self.user_id, "Family created");
            return Ok(family);
        }
        Err(Error::internal(format!(
            "no free family code after {MAX_CODE_ATTEMPTS} attempts"
        )))
    }

    /// Add the signed-in user to a family. Joining twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown or archived family.
    pub async fn join_family(&self, family_code: &str) -> Result<Family> {
        validate_family_code(family_code)?;
        let mut family = self.load_family(family_code).await?;

        if family.contains(&self.user_id) {
            debug!(family = family_code, user = %self.user_id, "Already a member");
            return Ok(family);
        }
        family
            .members
            .push(Member::joined(&self.user_id, self.clock.now(), false));
        self.write_members(family_code, &family, None).await?;
        self.set_profile_family(Some(family_code)).await;

        info!(family = family_code, user = %self.user_id, "Joined family");
        Ok(family)
    }

    /// Remove the signed-in user from the attached family and detach.
    ///
    /// If the user was the only admin the first remaining member becomes
    /// admin; the last member leaving archives the family.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached` without a family, or a not-found error if the
    /// user is not a member.
    pub async fn leave_family(&self) -> Result<Family> {
        let code = self.family_code().ok_or(Error::NotAttached)?;
        let mut family = self.load_family(&code).await?;
        if family.remove_member(&self.user_id).is_none() {
            return Err(Error::member_not_found(&code, &self.user_id));
        }

        self.write_members(&code, &family, Some(family.is_archived))
            .await?;
        self.set_profile_family(None).await;
        self.detach();

        info!(family = %code, user = %self.user_id, archived = family.is_archived, "Left family");
        Ok(family)
    }

    async fn load_family(&self, code: &str) -> Result<Family> {
        let document = self
            .store
            .get_document(FAMILIES, code)
            .await?
            .ok_or_else(|| Error::not_found(FAMILIES, code))?;
        let family = Family::from_document(code, &document)?;
        if family.is_archived {
            return Err(Error::FamilyArchived {
                code: code.to_string(),
            });
        }
        Ok(family)
    }

    async fn write_members(&self, code: &str, family: &Family, archived: Option<bool>) -> Result<()> {
        let mut patch = json!({ "members": serde_json::to_value(&family.members)? });
        if let Some(archived) = archived {
            patch["isArchived"] = Value::Bool(archived);
        }
        self.store.update_document(FAMILIES, code, patch).await
    }

    async fn set_profile_family(&self, code: Option<&str>) {
        if let Err(e) = self
            .store
            .set_document(USERS, &self.user_id, json!({ "familyCode": code }), SetOptions::merge())
            .await
        {
            warn!(user = %self.user_id, error = %e, "Failed to update profile family");
        }
    }
}

impl Drop for PresenceSynchronizer {
    fn drop(&mut self) {
        if let Some(attachment) = self.attachment().take() {
            attachment.end();
        }
    }
}

/// What the follower task needs from its synchronizer.
struct Follower {
    store: Arc<dyn DocumentStore>,
    engine: EscalationEngine,
    roster: Arc<watch::Sender<Vec<RosterMember>>>,
    code: String,
    detached: Arc<AtomicBool>,
}

impl Follower {
    fn detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

async fn follow(follower: Follower, mut updates: DocumentWatch) {
    let Follower {
        ref store,
        ref engine,
        ref roster,
        ref code,
        ..
    } = follower;

    loop {
        let snapshot = updates.borrow_and_update().clone();
        let family = snapshot.map(|document| Family::from_document(code, &document));

        match family {
            Some(Ok(family)) if !family.is_archived => {
                let members = enrich(store.as_ref(), &family.members).await;
                if follower.detached() {
                    return;
                }
                roster.send_replace(members);
                if let Err(e) = engine.initialize_monitoring(code, &family.members).await {
                    warn!(family = %code, error = %e, "Could not start monitoring");
                }
                // Detached while monitoring was starting: detach's stop may
                // have run before the listener existed.
                if follower.detached() {
                    engine.stop_monitoring(code);
                    return;
                }
            }
            Some(Err(e)) => warn!(family = %code, error = %e, "Ignoring unreadable family"),
            _ => {
                info!(family = %code, "Family archived or deleted");
                roster.send_replace(Vec::new());
                engine.stop_monitoring(code);
            }
        }

        if updates.changed().await.is_err() {
            return;
        }
    }
}

/// Join member entries with their user profiles.
///
/// A missing or unreadable profile leaves the extra fields empty.
async fn enrich(store: &dyn DocumentStore, members: &[Member]) -> Vec<RosterMember> {
    let mut roster = Vec::with_capacity(members.len());
    for member in members {
        let profile = match store.get_document(USERS, &member.user_id).await {
            Ok(profile) => profile.unwrap_or(Value::Null),
            Err(e) => {
                warn!(user = %member.user_id, error = %e, "Failed to read profile");
                Value::Null
            }
        };
        let text = |field: &str| profile.get(field).and_then(Value::as_str).map(str::to_string);
        roster.push(RosterMember {
            member: member.clone(),
            name: text("name"),
            phone: text("phone"),
            location: profile
                .get("location")
                .and_then(|location| serde_json::from_value(location.clone()).ok()),
        });
    }
    roster
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EscalationConfig;
    use crate::logging::init_test_logging;
    use crate::status::{Response, NOT_YET_RESPONDED_REASON};
    use crate::store::MemoryStore;
    use crate::store::Document;
    use crate::testing::{hours, load_family, member, minutes, origin, seed_family, settle, test_clock};
    use async_trait::async_trait;

    const CODE: &str = "123456";

    struct Harness {
        store: Arc<MemoryStore>,
        engine: EscalationEngine,
        sync: PresenceSynchronizer,
    }

    fn harness(user: &str) -> Harness {
        init_test_logging();
        let store = Arc::new(MemoryStore::new());
        let clock = test_clock();
        let engine = EscalationEngine::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            EscalationConfig::default(),
        );
        let sync = PresenceSynchronizer::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            engine.clone(),
            clock,
            user,
        );
        Harness { store, engine, sync }
    }

    async fn advance(by: std::time::Duration) {
        tokio::time::advance(by).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_publishes_enriched_roster_and_monitors() {
        let h = harness("alice");
        seed_family(
            &h.store,
            CODE,
            vec![member("alice", "I'm Safe", origin()), member("bob", "Evacuated", origin())],
        )
        .await;
        h.store
            .set_document(
                USERS,
                "alice",
                json!({ "name": "Alice", "phone": "555-0100" }),
                SetOptions::replace(),
            )
            .await
            .unwrap();

        h.sync.attach(CODE).await.unwrap();
        settle().await;

        let roster = h.sync.roster().borrow().clone();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].name.as_deref(), Some("Alice"));
        assert_eq!(roster[0].phone.as_deref(), Some("555-0100"));
        assert!(roster[1].name.is_none());
        assert!(h.engine.is_monitoring(CODE));
        assert_eq!(h.engine.armed_timers(CODE).len(), 2);

        // Attaching again is a no-op.
        h.sync.attach(CODE).await.unwrap();
        assert_eq!(h.store.subscriber_count(FAMILIES, CODE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_scenario_without_updates() {
        let h = harness("alice");
        seed_family(&h.store, CODE, vec![member("alice", "I'm Safe", origin())]).await;
        h.sync.attach(CODE).await.unwrap();
        settle().await;

        advance(hours(2)).await;
        let alice = h.sync.roster().borrow()[0].member.clone();
        assert_eq!(alice.status, SafetyStatus::NotYetResponded);
        assert!(alice.auto_updated);
        assert_eq!(alice.auto_update_reason.as_deref(), Some(NOT_YET_RESPONDED_REASON));

        advance(hours(6)).await;
        let alice = h.sync.roster().borrow()[0].member.clone();
        assert_eq!(alice.status, SafetyStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_update_moves_deadline() {
        let h = harness("alice");
        seed_family(&h.store, CODE, vec![member("alice", "I'm Safe", origin())]).await;
        h.sync.attach(CODE).await.unwrap();
        settle().await;

        advance(hours(1)).await;
        let updated = h
            .sync
            .update_user_status(SafetyStatus::parse("Evacuated"))
            .await
            .unwrap();
        settle().await;
        assert_eq!(updated.last_update, origin() + chrono::Duration::hours(1));

        let timers = h.engine.armed_timers(CODE);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].deadline, origin() + chrono::Duration::hours(3));

        advance(hours(1) + minutes(59)).await;
        assert_eq!(
            load_family(&h.store, CODE).await.member("alice").unwrap().status,
            SafetyStatus::Responded(Response::Evacuated)
        );

        advance(minutes(1)).await;
        assert_eq!(
            load_family(&h.store, CODE).await.member("alice").unwrap().status,
            SafetyStatus::NotYetResponded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_update_clears_auto_marks() {
        let h = harness("alice");
        seed_family(&h.store, CODE, vec![member("alice", "I'm Safe", origin())]).await;
        h.sync.attach(CODE).await.unwrap();
        settle().await;
        advance(hours(2)).await;

        let updated = h.sync.update_user_status(SafetyStatus::safe()).await.unwrap();
        assert!(!updated.auto_updated);
        assert!(updated.auto_update_reason.is_none());
        assert!(updated.auto_updated_at.is_none());

        let timers = h.engine.armed_timers(CODE);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].stage, crate::status::EscalationStage::ToNotYetResponded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_requires_attachment_and_membership() {
        let h = harness("carol");
        let err = h.sync.update_user_status(SafetyStatus::safe()).await.unwrap_err();
        assert!(matches!(err, Error::NotAttached));

        seed_family(&h.store, CODE, vec![member("alice", "I'm Safe", origin())]).await;
        h.sync.attach(CODE).await.unwrap();
        let err = h.sync.update_user_status(SafetyStatus::safe()).await.unwrap_err();
        assert!(matches!(err, Error::MemberNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_and_join_family() {
        let h = harness("alice");
        let family = h.sync.create_family(Some("Tanaka".to_string())).await.unwrap();

        assert!(validate_family_code(&family.code).is_ok());
        assert_eq!(family.members.len(), 1);
        assert!(family.members[0].is_admin);
        assert_eq!(family.members[0].status, SafetyStatus::NotYetResponded);
        let profile = h.store.get_document(USERS, "alice").await.unwrap().unwrap();
        assert_eq!(profile["familyCode"], family.code.as_str());

        let bob = PresenceSynchronizer::new(
            Arc::clone(&h.store) as Arc<dyn DocumentStore>,
            h.engine.clone(),
            test_clock(),
            "bob",
        );
        bob.join_family(&family.code).await.unwrap();
        let joined = bob.join_family(&family.code).await.unwrap();
        assert_eq!(joined.members.len(), 2);
        assert!(!joined.member("bob").unwrap().is_admin);
        assert_eq!(load_family(&h.store, &family.code).await.members.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_family_skips_taken_codes() {
        let h = harness("alice");
        let taken = derive_family_code("alice", origin(), 0);
        seed_family(&h.store, &taken, vec![member("zed", "I'm Safe", origin())]).await;

        let family = h.sync.create_family(None).await.unwrap();
        assert_ne!(family.code, taken);
        assert_eq!(family.code, derive_family_code("alice", origin(), 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_rejects_unknown_and_archived() {
        let h = harness("bob");
        let err = h.sync.join_family("999999").await.unwrap_err();
        assert!(err.is_not_found());

        let err = h.sync.join_family("12ab").await.unwrap_err();
        assert!(matches!(err, Error::InvalidFamilyCode(_)));

        seed_family(&h.store, CODE, vec![member("alice", "I'm Safe", origin())]).await;
        h.store
            .update_document(FAMILIES, CODE, json!({ "isArchived": true }))
            .await
            .unwrap();
        let err = h.sync.join_family(CODE).await.unwrap_err();
        assert!(matches!(err, Error::FamilyArchived { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_family_promotes_admin_and_stops_monitoring() {
        let h = harness("alice");
        let mut alice = member("alice", "I'm Safe", origin());
        alice.is_admin = true;
        seed_family(&h.store, CODE, vec![alice, member("bob", "I'm Safe", origin())]).await;
        h.sync.attach(CODE).await.unwrap();
        settle().await;

        let family = h.sync.leave_family().await.unwrap();
        settle().await;

        assert!(!family.is_archived);
        assert!(family.member("bob").unwrap().is_admin);
        assert!(!h.engine.is_monitoring(CODE));
        assert!(h.sync.family_code().is_none());
        assert!(h.sync.roster().borrow().is_empty());

        let stored = load_family(&h.store, CODE).await;
        assert!(!stored.contains("alice"));
        assert!(stored.member("bob").unwrap().is_admin);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_member_leaving_archives() {
        let h = harness("alice");
        seed_family(&h.store, CODE, vec![member("alice", "I'm Safe", origin())]).await;
        h.sync.attach(CODE).await.unwrap();
        settle().await;

        let family = h.sync.leave_family().await.unwrap();
        assert!(family.is_archived);

        let stored = h.store.get_document(FAMILIES, CODE).await.unwrap().unwrap();
        assert_eq!(stored["isArchived"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_archived_snapshot_empties_roster() {
        let h = harness("alice");
        seed_family(&h.store, CODE, vec![member("alice", "I'm Safe", origin())]).await;
        h.sync.attach(CODE).await.unwrap();
        settle().await;
        assert_eq!(h.sync.roster().borrow().len(), 1);

        h.store
            .update_document(FAMILIES, CODE, json!({ "isArchived": true }))
            .await
            .unwrap();
        settle().await;

        assert!(h.sync.roster().borrow().is_empty());
        assert!(!h.engine.is_monitoring(CODE));
    }

    /// Raises the detach flag when the engine subscribes, the way a detach
    /// racing with the follower on another worker would.
    #[derive(Debug)]
    struct DetachOnSubscribe {
        inner: Arc<MemoryStore>,
        detached: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DocumentStore for DetachOnSubscribe {
        async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
            self.inner.get_document(collection, id).await
        }

        async fn set_document(
            &self,
            collection: &str,
            id: &str,
            data: Document,
            options: SetOptions,
        ) -> Result<()> {
            self.inner.set_document(collection, id, data, options).await
        }

        async fn update_document(&self, collection: &str, id: &str, partial: Document) -> Result<()> {
            self.inner.update_document(collection, id, partial).await
        }

        async fn subscribe(&self, collection: &str, id: &str) -> Result<DocumentWatch> {
            let updates = self.inner.subscribe(collection, id).await?;
            self.detached.store(true, Ordering::SeqCst);
            Ok(updates)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_while_monitoring_starts_leaves_family_unmonitored() {
        init_test_logging();
        let memory = Arc::new(MemoryStore::new());
        seed_family(&memory, CODE, vec![member("alice", "I'm Safe", origin())]).await;

        let detached = Arc::new(AtomicBool::new(false));
        let store: Arc<dyn DocumentStore> = Arc::new(DetachOnSubscribe {
            inner: Arc::clone(&memory),
            detached: Arc::clone(&detached),
        });
        let engine = EscalationEngine::new(
            Arc::clone(&store),
            test_clock(),
            EscalationConfig::default(),
        );
        let updates = memory.subscribe(FAMILIES, CODE).await.unwrap();
        let (roster, _) = watch::channel(Vec::new());
        let follower = Follower {
            store,
            engine: engine.clone(),
            roster: Arc::new(roster),
            code: CODE.to_string(),
            detached,
        };

        tokio::time::timeout(std::time::Duration::from_secs(1), follow(follower, updates))
            .await
            .expect("follower ends once detached");
        settle().await;

        assert!(!engine.is_monitoring(CODE));
        assert!(engine.armed_timers(CODE).is_empty());
        assert_eq!(memory.subscriber_count(FAMILIES, CODE), 0);

        let writes = memory.write_count();
        advance(hours(3)).await;
        assert_eq!(memory.write_count(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_subscriptions() {
        let h = harness("alice");
        seed_family(&h.store, CODE, vec![member("alice", "I'm Safe", origin())]).await;
        h.sync.attach(CODE).await.unwrap();
        settle().await;
        assert_eq!(h.store.subscriber_count(FAMILIES, CODE), 2);

        h.sync.shutdown();
        settle().await;

        assert_eq!(h.store.subscriber_count(FAMILIES, CODE), 0);
        assert!(h.engine.monitored_families().is_empty());
        let writes = h.store.write_count();
        advance(hours(10)).await;
        assert_eq!(h.store.write_count(), writes);
    }
}
