//! Registry of armed escalation timers.
//!
//! Each member of a monitored family has at most one live timer. The record
//! carries the stage it will apply, the wall-clock deadline, the `lastUpdate`
//! it was computed from, and a generation number. A firing task must claim
//! its record by generation before acting, and cancelling removes the record
//! and aborts the task, so a cancelled timer can never act.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::status::EscalationStage;

type MemberKey = (String, String);

/// A timer as seen from outside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedTimer {
    /// Member the timer belongs to.
    pub user_id: String,
    /// Stage it will apply.
    pub stage: EscalationStage,
    /// When it fires.
    pub deadline: DateTime<Utc>,
    /// The member's `lastUpdate` when it was armed.
    pub basis: DateTime<Utc>,
}

/// When and from what a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Schedule {
    pub(crate) stage: EscalationStage,
    pub(crate) deadline: DateTime<Utc>,
    pub(crate) basis: DateTime<Utc>,
}

/// What a firing task learns when it claims its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Claim {
    pub(crate) stage: EscalationStage,
    pub(crate) basis: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    stage: EscalationStage,
    deadline: DateTime<Utc>,
    basis: DateTime<Utc>,
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Slots {
    entries: HashMap<MemberKey, Entry>,
    next_generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct TimerRegistry {
    slots: Mutex<Slots>,
}

fn key(family: &str, user: &str) -> MemberKey {
    (family.to_string(), user.to_string())
}

impl TimerRegistry {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the member's live timer is for `stage` armed from `basis`.
    pub(crate) fn matches(
        &self,
        family: &str,
        user: &str,
        stage: EscalationStage,
        basis: DateTime<Utc>,
    ) -> bool {
        self.lock()
            .entries
            .get(&key(family, user))
            .is_some_and(|entry| entry.stage == stage && entry.basis == basis)
    }

    /// Arm a timer, spawning its task with the generation it must claim.
    ///
    /// With `replace` set, an existing timer for the member is cancelled;
    /// otherwise an existing timer wins and nothing is spawned. The task is
    /// spawned under the registry lock, so it cannot claim before its record
    /// exists. Returns whether the timer was armed.
    pub(crate) fn arm<F>(
        &self,
        family: &str,
        user: &str,
        schedule: Schedule,
        replace: bool,
        spawn: F,
    ) -> bool
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let mut slots = self.lock();
        let key = key(family, user);
        if !replace && slots.entries.contains_key(&key) {
            return false;
        }

        slots.next_generation += 1;
        let generation = slots.next_generation;
        let task = spawn(generation);
        let previous = slots.entries.insert(
            key,
            Entry {
                stage: schedule.stage,
                deadline: schedule.deadline,
                basis: schedule.basis,
                generation,
                task,
            },
        );
        if let Some(previous) = previous {
            previous.task.abort();
        }
        true
    }

    /// Take ownership of a timer that is firing.
    ///
    /// Returns `None` if the timer was cancelled or replaced meanwhile.
    pub(crate) fn claim(&self, family: &str, user: &str, generation: u64) -> Option<Claim> {
        let mut slots = self.lock();
        let key = key(family, user);
        if slots.entries.get(&key)?.generation != generation {
            return None;
        }
        let entry = slots.entries.remove(&key)?;
        Some(Claim {
            stage: entry.stage,
            basis: entry.basis,
        })
    }

    /// Cancel the member's timer. Returns whether one was live.
    pub(crate) fn cancel(&self, family: &str, user: &str) -> bool {
        let Some(entry) = self.lock().entries.remove(&key(family, user)) else {
            return false;
        };
        entry.task.abort();
        true
    }

    /// Cancel every timer of a family whose member is not in `present`.
    pub(crate) fn cancel_absent(&self, family: &str, present: &HashSet<&str>) -> Vec<String> {
        self.cancel_where(|(f, u)| f == family && !present.contains(u.as_str()))
    }

    /// Cancel every timer of a family.
    pub(crate) fn cancel_family(&self, family: &str) -> usize {
        self.cancel_where(|(f, _)| f == family).len()
    }

    /// Cancel every timer.
    pub(crate) fn cancel_all(&self) -> usize {
        self.cancel_where(|_| true).len()
    }

    fn cancel_where<P>(&self, mut doomed: P) -> Vec<String>
    where
        P: FnMut(&MemberKey) -> bool,
    {
        let mut slots = self.lock();
        let keys: Vec<MemberKey> = slots.entries.keys().filter(|k| doomed(k)).cloned().collect();
        keys.into_iter()
            .filter_map(|k| {
                let entry = slots.entries.remove(&k)?;
                entry.task.abort();
                Some(k.1)
            })
            .collect()
    }

    /// The live timers of a family, ordered by user.
    pub(crate) fn family(&self, family: &str) -> Vec<ArmedTimer> {
        let slots = self.lock();
        let mut timers: Vec<ArmedTimer> = slots
            .entries
            .iter()
            .filter(|((f, _), _)| f == family)
            .map(|((_, user), entry)| ArmedTimer {
                user_id: user.clone(),
                stage: entry.stage,
                deadline: entry.deadline,
                basis: entry.basis,
            })
            .collect();
        timers.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        timers
    }

    /// Number of live timers.
    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }
}
