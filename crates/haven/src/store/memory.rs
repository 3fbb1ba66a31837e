//! In-process document store.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::trace;

use super::{
    merge_documents, update_fields, Document, DocumentStore, DocumentWatch, SetOptions, Watchers,
};
use crate::error::{Error, Result};

type DocumentKey = (String, String);

/// A [`DocumentStore`] that lives entirely in memory.
///
/// Used by tests and by embedders that bring their own persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<DocumentKey, Document>>,
    watchers: Watchers,
    writes: AtomicU64,
    reject_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions to a document.
    #[must_use]
    pub fn subscriber_count(&self, collection: &str, id: &str) -> usize {
        self.watchers.subscriber_count(collection, id)
    }

    /// Make every following write fail until switched back.
    ///
    /// Simulates a store that is offline or refusing writes.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Delete a document. Returns whether it existed.
    pub fn delete_document(&self, collection: &str, id: &str) -> bool {
        let existed = self
            .lock()
            .remove(&(collection.to_string(), id.to_string()))
            .is_some();
        if existed {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.watchers.publish(collection, id, None);
        }
        existed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DocumentKey, Document>> {
        self.documents
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_writable(&self, collection: &str, id: &str) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(Error::internal(format!(
                "write to {collection}/{id} rejected"
            )));
        }
        Ok(())
    }

    fn committed(&self, collection: &str, id: &str, document: Document) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        trace!(collection, id, "document written");
        self.watchers.publish(collection, id, Some(document));
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self
            .lock()
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Document,
        options: SetOptions,
    ) -> Result<()> {
        self.check_writable(collection, id)?;
        let document = {
            let mut documents = self.lock();
            match documents.entry((collection.to_string(), id.to_string())) {
                Entry::Occupied(mut slot) if options.merge => {
                    merge_documents(slot.get_mut(), data);
                    slot.get().clone()
                }
                Entry::Occupied(mut slot) => {
                    slot.insert(data.clone());
                    data
                }
                Entry::Vacant(slot) => {
                    slot.insert(data.clone());
                    data
                }
            }
        };
        self.committed(collection, id, document);
        Ok(())
    }

    async fn update_document(&self, collection: &str, id: &str, partial: Document) -> Result<()> {
        self.check_writable(collection, id)?;
        let document = {
            let mut documents = self.lock();
            let Some(existing) = documents.get_mut(&(collection.to_string(), id.to_string()))
            else {
                return Err(Error::not_found(collection, id));
            };
            update_fields(existing, partial);
            existing.clone()
        };
        self.committed(collection, id, document);
        Ok(())
    }

    async fn subscribe(&self, collection: &str, id: &str) -> Result<DocumentWatch> {
        let current = self.get_document(collection, id).await?;
        Ok(self.watchers.subscribe(collection, id, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        assert!(store.get_document("users", "alice").await.unwrap().is_none());

        store
            .set_document("users", "alice", json!({ "name": "Alice" }), SetOptions::replace())
            .await
            .unwrap();
        let doc = store.get_document("users", "alice").await.unwrap().unwrap();
        assert_eq!(doc["name"], "Alice");
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_set_merge_keeps_other_fields() {
        let store = MemoryStore::new();
        store
            .set_document("users", "alice", json!({ "name": "Alice" }), SetOptions::replace())
            .await
            .unwrap();
        store
            .set_document("users", "alice", json!({ "phone": "555" }), SetOptions::merge())
            .await
            .unwrap();

        let doc = store.get_document("users", "alice").await.unwrap().unwrap();
        assert_eq!(doc, json!({ "name": "Alice", "phone": "555" }));
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .update_document("families", "123456", json!({ "isArchived": true }))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_subscribe_sees_writes_and_deletes() {
        let store = MemoryStore::new();
        store
            .set_document("families", "123456", json!({ "code": "123456" }), SetOptions::replace())
            .await
            .unwrap();

        let mut rx = store.subscribe("families", "123456").await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap()["code"], "123456");

        store
            .update_document("families", "123456", json!({ "isArchived": true }))
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap()["isArchived"], true);

        assert!(store.delete_document("families", "123456"));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_rejected_writes() {
        let store = MemoryStore::new();
        store.set_reject_writes(true);
        let result = store
            .set_document("users", "alice", json!({}), SetOptions::replace())
            .await;
        assert!(result.is_err());
        assert_eq!(store.write_count(), 0);

        store.set_reject_writes(false);
        store
            .set_document("users", "alice", json!({}), SetOptions::replace())
            .await
            .unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_count_drops_with_receiver() {
        let store = MemoryStore::new();
        let rx = store.subscribe("families", "123456").await.unwrap();
        assert_eq!(store.subscriber_count("families", "123456"), 1);
        drop(rx);
        assert_eq!(store.subscriber_count("families", "123456"), 0);
    }
}
