//! Test doubles shared across modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::clock::TokioClock;
use crate::family::{Family, Member};
use crate::location::{
    Accuracy, BackgroundTaskOptions, LocationError, LocationProvider, LocationResult, Position,
    WatchId, WatchOptions,
};
use crate::status::SafetyStatus;
use crate::store::{DocumentStore, MemoryStore, SetOptions, FAMILIES};

/// 2024-03-01T00:00:00Z, the wall-clock start of every paused-time test.
pub(crate) fn origin() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// A clock that reads [`origin`] when the test starts.
pub(crate) fn test_clock() -> Arc<TokioClock> {
    Arc::new(TokioClock::starting_at(origin()))
}

pub(crate) fn hours(n: u64) -> Duration {
    Duration::from_secs(n * 60 * 60)
}

pub(crate) fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

pub(crate) fn position_at(timestamp: DateTime<Utc>) -> Position {
    Position {
        latitude: 35.6812,
        longitude: 139.7671,
        accuracy: Some(15.0),
        timestamp,
    }
}

/// A member who answered `status` at `at`.
pub(crate) fn member(user: &str, status: &str, at: DateTime<Utc>) -> Member {
    let mut member = Member::joined(user, at, false);
    member.apply_manual(SafetyStatus::parse(status), at);
    member
}

/// Write a family with the given members and return it.
pub(crate) async fn seed_family(store: &MemoryStore, code: &str, members: Vec<Member>) -> Family {
    let family = Family {
        code: code.to_string(),
        name: Some("Test family".to_string()),
        members,
        is_archived: false,
        created_at: Some(origin()),
    };
    store
        .set_document(
            FAMILIES,
            code,
            family.to_document().expect("family encodes"),
            SetOptions::replace(),
        )
        .await
        .expect("seed family");
    family
}

/// Read a family back from the store.
pub(crate) async fn load_family(store: &MemoryStore, code: &str) -> Family {
    let document = store
        .get_document(FAMILIES, code)
        .await
        .expect("read family")
        .expect("family exists");
    Family::from_document(code, &document).expect("family decodes")
}

/// Let spawned tasks run until they block.
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// A scriptable [`LocationProvider`].
///
/// Permission prompts can be told to grant, deny or hang. Every call is
/// counted so tests can assert which prompts were shown.
#[derive(Debug, Default)]
pub(crate) struct FakeLocationProvider {
    services_enabled: AtomicBool,
    foreground: AtomicBool,
    background: AtomicBool,
    grant_foreground_on_request: AtomicBool,
    grant_background_on_request: AtomicBool,
    hang_foreground_request: AtomicBool,
    hang_background_request: AtomicBool,
    fail_unregister: AtomicBool,
    position: Mutex<Option<Position>>,
    watches: Mutex<HashMap<u64, mpsc::Sender<Position>>>,
    background_task: Mutex<Option<mpsc::Sender<Position>>>,
    last_watch: Mutex<Option<WatchOptions>>,
    next_watch: AtomicU64,
    foreground_requests: AtomicUsize,
    background_requests: AtomicUsize,
    current_position_calls: AtomicUsize,
    watches_started: AtomicUsize,
    watches_cleared: AtomicUsize,
    registrations: AtomicUsize,
    unregistrations: AtomicUsize,
}

impl FakeLocationProvider {
    /// Services on, nothing granted, prompts deny.
    pub(crate) fn new() -> Self {
        let provider = Self::default();
        provider.services_enabled.store(true, Ordering::SeqCst);
        provider
    }

    /// Services on, both permissions already granted.
    pub(crate) fn granted() -> Self {
        let provider = Self::new();
        provider.foreground.store(true, Ordering::SeqCst);
        provider.background.store(true, Ordering::SeqCst);
        provider
    }

    pub(crate) fn set_services_enabled(&self, enabled: bool) {
        self.services_enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn grant_foreground_on_request(&self, grant: bool) {
        self.grant_foreground_on_request.store(grant, Ordering::SeqCst);
    }

    pub(crate) fn grant_background_on_request(&self, grant: bool) {
        self.grant_background_on_request.store(grant, Ordering::SeqCst);
    }

    /// The prompt never answers. A grant still takes effect in the OS.
    pub(crate) fn hang_foreground_request(&self, hang: bool) {
        self.hang_foreground_request.store(hang, Ordering::SeqCst);
    }

    pub(crate) fn hang_background_request(&self, hang: bool) {
        self.hang_background_request.store(hang, Ordering::SeqCst);
    }

    pub(crate) fn fail_unregister(&self, fail: bool) {
        self.fail_unregister.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_position(&self, position: Position) {
        *lock(&self.position) = Some(position);
    }

    pub(crate) fn foreground_requests(&self) -> usize {
        self.foreground_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn background_requests(&self) -> usize {
        self.background_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn current_position_calls(&self) -> usize {
        self.current_position_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn watches_started(&self) -> usize {
        self.watches_started.load(Ordering::SeqCst)
    }

    pub(crate) fn watches_cleared(&self) -> usize {
        self.watches_cleared.load(Ordering::SeqCst)
    }

    pub(crate) fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub(crate) fn unregistrations(&self) -> usize {
        self.unregistrations.load(Ordering::SeqCst)
    }

    pub(crate) fn active_watches(&self) -> usize {
        lock(&self.watches).len()
    }

    pub(crate) fn background_active(&self) -> bool {
        lock(&self.background_task).is_some()
    }

    pub(crate) fn last_watch_options(&self) -> Option<WatchOptions> {
        *lock(&self.last_watch)
    }

    /// Deliver a fix to every running foreground watch.
    pub(crate) async fn emit(&self, position: Position) {
        let senders: Vec<_> = lock(&self.watches).values().cloned().collect();
        for sender in senders {
            let _ = sender.send(position).await;
        }
    }

    /// Deliver a fix through the background task.
    pub(crate) async fn emit_background(&self, position: Position) {
        let sender = lock(&self.background_task).clone();
        if let Some(sender) = sender {
            let _ = sender.send(position).await;
        }
    }

    fn require_foreground(&self) -> LocationResult<()> {
        if !self.services_enabled.load(Ordering::SeqCst) {
            return Err(LocationError::ServicesDisabled);
        }
        if !self.foreground.load(Ordering::SeqCst) {
            return Err(LocationError::PermissionDenied);
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl LocationProvider for FakeLocationProvider {
    async fn has_services_enabled(&self) -> LocationResult<bool> {
        Ok(self.services_enabled.load(Ordering::SeqCst))
    }

    async fn get_foreground_permission(&self) -> LocationResult<bool> {
        Ok(self.foreground.load(Ordering::SeqCst))
    }

    async fn request_foreground_permission(&self) -> LocationResult<bool> {
        self.foreground_requests.fetch_add(1, Ordering::SeqCst);
        if self.grant_foreground_on_request.load(Ordering::SeqCst) {
            self.foreground.store(true, Ordering::SeqCst);
        }
        if self.hang_foreground_request.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.foreground.load(Ordering::SeqCst))
    }

    async fn get_background_permission(&self) -> LocationResult<bool> {
        Ok(self.background.load(Ordering::SeqCst))
    }

    async fn request_background_permission(&self) -> LocationResult<bool> {
        self.background_requests.fetch_add(1, Ordering::SeqCst);
        if self.grant_background_on_request.load(Ordering::SeqCst) {
            self.background.store(true, Ordering::SeqCst);
        }
        if self.hang_background_request.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.background.load(Ordering::SeqCst))
    }

    async fn get_current_position(
        &self,
        _accuracy: Accuracy,
        _timeout: Duration,
        _max_age: Duration,
    ) -> LocationResult<Position> {
        self.current_position_calls.fetch_add(1, Ordering::SeqCst);
        self.require_foreground()?;
        let position = *lock(&self.position);
        position.ok_or_else(|| LocationError::Unknown("no fix available".to_string()))
    }

    async fn watch_position(
        &self,
        options: WatchOptions,
        updates: mpsc::Sender<Position>,
    ) -> LocationResult<WatchId> {
        self.require_foreground()?;
        let id = self.next_watch.fetch_add(1, Ordering::SeqCst);
        lock(&self.watches).insert(id, updates);
        *lock(&self.last_watch) = Some(options);
        self.watches_started.fetch_add(1, Ordering::SeqCst);
        Ok(WatchId(id))
    }

    async fn clear_watch(&self, id: WatchId) -> LocationResult<()> {
        self.watches_cleared.fetch_add(1, Ordering::SeqCst);
        lock(&self.watches).remove(&id.0);
        Ok(())
    }

    async fn register_background_task(
        &self,
        _task_id: &str,
        _options: BackgroundTaskOptions,
        updates: mpsc::Sender<Position>,
    ) -> LocationResult<()> {
        if !self.background.load(Ordering::SeqCst) {
            return Err(LocationError::PermissionDenied);
        }
        *lock(&self.background_task) = Some(updates);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister_background_task(&self, task_id: &str) -> LocationResult<()> {
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(LocationError::Unknown(format!("task {task_id} is not registered")));
        }
        lock(&self.background_task).take();
        Ok(())
    }
}
