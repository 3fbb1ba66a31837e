//! Document store contract and implementations.
//!
//! The engine only needs four operations from its backing store: get, set
//! (optionally merging), partial update, and a real-time subscription to a
//! single document. [`MemoryStore`] keeps everything in process;
//! [`SqliteStore`] persists documents in `SQLite`.

mod memory;
pub mod migrations;
pub mod schema;
mod sqlite;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::Result;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StoreStats};

/// A stored document: a JSON object.
pub type Document = Value;

/// Receiver side of a document subscription.
///
/// Holds `None` while the document does not exist. Dropping the receiver
/// unsubscribes.
pub type DocumentWatch = watch::Receiver<Option<Document>>;

/// Collection holding family documents keyed by family code.
pub const FAMILIES: &str = "families";

/// Collection holding per-user profile documents.
pub const USERS: &str = "users";

/// Collection holding the latest emergency location per user.
pub const EMERGENCY_LOCATIONS: &str = "emergencyLocations";

/// Options for [`DocumentStore::set_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// Merge into the existing document instead of replacing it.
    pub merge: bool,
}

impl SetOptions {
    /// Replace the whole document.
    #[must_use]
    pub fn replace() -> Self {
        Self { merge: false }
    }

    /// Merge into the existing document.
    #[must_use]
    pub fn merge() -> Self {
        Self { merge: true }
    }
}

/// A document database with per-document subscriptions.
#[async_trait]
pub trait DocumentStore: Send + Sync + Debug {
    /// Read a document, `None` if it does not exist.
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Write a document, creating it if needed.
    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Document,
        options: SetOptions,
    ) -> Result<()>;

    /// Overwrite the given top-level fields of an existing document.
    ///
    /// # Errors
    ///
    /// Fails with `DocumentNotFound` when the document does not exist.
    async fn update_document(&self, collection: &str, id: &str, partial: Document) -> Result<()>;

    /// Subscribe to a document.
    ///
    /// The receiver starts out holding the current contents; every later
    /// write is published to it.
    async fn subscribe(&self, collection: &str, id: &str) -> Result<DocumentWatch>;
}

/// Merge `patch` into `target`.
///
/// Objects are merged key by key, recursively; any other value replaces what
/// was there.
pub fn merge_documents(target: &mut Document, patch: Document) {
    match (target, patch) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) if slot.is_object() && value.is_object() => {
                        merge_documents(slot, value);
                    }
                    _ => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply an `update_document` patch: top-level fields are overwritten.
pub(crate) fn update_fields(target: &mut Document, partial: Document) {
    match (target, partial) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                existing.insert(key, value);
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Per-document watch channels shared by the store implementations.
#[derive(Debug, Default)]
pub(crate) struct Watchers {
    channels: Mutex<HashMap<(String, String), watch::Sender<Option<Document>>>>,
}

impl Watchers {
    /// Subscribe to a document whose current contents are `current`.
    pub(crate) fn subscribe(
        &self,
        collection: &str,
        id: &str,
        current: Option<Document>,
    ) -> DocumentWatch {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (collection.to_string(), id.to_string());
        if let Some(sender) = channels.get(&key) {
            sender.send_if_modified(|held| {
                if *held == current {
                    false
                } else {
                    *held = current;
                    true
                }
            });
            return sender.subscribe();
        }
        let (sender, receiver) = watch::channel(current);
        channels.insert(key, sender);
        receiver
    }

    /// Publish new contents to every subscriber of a document.
    pub(crate) fn publish(&self, collection: &str, id: &str, current: Option<Document>) {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (collection.to_string(), id.to_string());
        let Some(sender) = channels.get(&key) else {
            return;
        };
        if sender.receiver_count() == 0 {
            channels.remove(&key);
            return;
        }
        sender.send_replace(current);
    }

    /// Publish only if the contents differ from what subscribers last saw.
    ///
    /// Returns whether anything was published.
    pub(crate) fn publish_if_changed(
        &self,
        collection: &str,
        id: &str,
        current: Option<Document>,
    ) -> bool {
        let channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(sender) = channels.get(&(collection.to_string(), id.to_string())) else {
            return false;
        };
        sender.send_if_modified(|held| {
            if *held == current {
                false
            } else {
                *held = current;
                true
            }
        })
    }

    /// Number of live subscriptions to a document.
    pub(crate) fn subscriber_count(&self, collection: &str, id: &str) -> usize {
        let channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        channels
            .get(&(collection.to_string(), id.to_string()))
            .map_or(0, watch::Sender::receiver_count)
    }

    /// Every document that currently has a channel.
    pub(crate) fn watched(&self) -> Vec<(String, String)> {
        let channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        channels.keys().cloned().collect()
    }
}
