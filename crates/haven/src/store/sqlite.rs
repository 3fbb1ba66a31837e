//! `SQLite`-backed document store.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::migrations;
use super::{
    merge_documents, update_fields, Document, DocumentStore, DocumentWatch, SetOptions, Watchers,
};
use crate::error::{Error, Result};

/// Persistent [`DocumentStore`] on top of `SQLite`.
///
/// Documents are stored as JSON text keyed by `(collection, id)`.
/// Subscriptions are in-process: writes made through this handle are
/// published immediately, writes made by other processes are picked up by
/// [`SqliteStore::refresh_watched`].
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    watchers: Watchers,
}

impl SqliteStore {
    /// Open or create a store database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets the CLI read while a monitor process writes.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            watchers: Watchers::default(),
        })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
            watchers: Watchers::default(),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// List every document in a collection, most recently written first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r"
            SELECT id, data FROM documents WHERE collection = ?1
            ORDER BY updated_at DESC
            ",
        )?;
        let rows = stmt
            .query_map([collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, data)| {
                let document = decode(collection, &id, &data)?;
                Ok((id, document))
            })
            .collect()
    }

    /// Delete a document. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let affected = self.lock().execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            [collection, id],
        )?;
        if affected > 0 {
            self.watchers.publish(collection, id, None);
        }
        Ok(affected > 0)
    }

    /// Re-read one watched document and publish it if it changed.
    ///
    /// Returns whether subscribers were notified.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn refresh(&self, collection: &str, id: &str) -> Result<bool> {
        let current = self.read(collection, id)?;
        Ok(self.watchers.publish_if_changed(collection, id, current))
    }

    /// Re-read every watched document, returning how many changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn refresh_watched(&self) -> Result<usize> {
        let mut changed = 0;
        for (collection, id) in self.watchers.watched() {
            if self.refresh(&collection, &id)? {
                debug!(collection, id, "external change picked up");
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock();
        let total_documents: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let newest: Option<String> = conn
            .query_row(
                "SELECT updated_at FROM documents ORDER BY updated_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        let last_write = newest
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            total_documents,
            last_write,
            db_size_bytes,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        read_document(&self.lock(), collection, id)
    }

    /// Read, transform and write back one document under a single lock.
    fn modify<F>(&self, collection: &str, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(Option<Document>) -> Result<Document>,
    {
        let document = {
            let conn = self.lock();
            let existing = read_document(&conn, collection, id)?;
            let document = apply(existing)?;
            conn.execute(
                r"
                INSERT INTO documents (collection, id, data, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (collection, id) DO UPDATE SET data = ?3, updated_at = ?4
                ",
                params![
                    collection,
                    id,
                    serde_json::to_string(&document)?,
                    Utc::now().to_rfc3339()
                ],
            )?;
            document
        };
        debug!(collection, id, "document written");
        self.watchers.publish(collection, id, Some(document));
        Ok(())
    }
}

fn read_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
            [collection, id],
            |row| row.get(0),
        )
        .optional()?;
    data.map(|data| decode(collection, id, &data)).transpose()
}

fn decode(collection: &str, id: &str, data: &str) -> Result<Document> {
    serde_json::from_str(data).map_err(|e| {
        warn!(collection, id, error = %e, "Stored document is not valid JSON");
        Error::invalid_document(collection, id, e.to_string())
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.read(collection, id)
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Document,
        options: SetOptions,
    ) -> Result<()> {
        self.modify(collection, id, |existing| {
            Ok(match existing {
                Some(mut existing) if options.merge => {
                    merge_documents(&mut existing, data);
                    existing
                }
                _ => data,
            })
        })
    }

    async fn update_document(&self, collection: &str, id: &str, partial: Document) -> Result<()> {
        self.modify(collection, id, |existing| {
            let Some(mut existing) = existing else {
                return Err(Error::not_found(collection, id));
            };
            update_fields(&mut existing, partial);
            Ok(existing)
        })
    }

    async fn subscribe(&self, collection: &str, id: &str) -> Result<DocumentWatch> {
        let current = self.read(collection, id)?;
        Ok(self.watchers.subscribe(collection, id, current))
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Total number of documents across all collections.
    pub total_documents: i64,
    /// When the most recent write happened.
    pub last_write: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("failed to create test store")
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = create_test_store();
        store
            .set_document("users", "alice", json!({ "name": "Alice" }), SetOptions::replace())
            .await
            .unwrap();

        let doc = store.get_document("users", "alice").await.unwrap().unwrap();
        assert_eq!(doc["name"], "Alice");
        assert!(store.get_document("users", "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_replace_and_merge() {
        let store = create_test_store();
        store
            .set_document("users", "alice", json!({ "name": "Alice", "phone": "1" }), SetOptions::replace())
            .await
            .unwrap();
        store
            .set_document("users", "alice", json!({ "phone": "2" }), SetOptions::merge())
            .await
            .unwrap();
        assert_eq!(
            store.get_document("users", "alice").await.unwrap().unwrap(),
            json!({ "name": "Alice", "phone": "2" })
        );

        store
            .set_document("users", "alice", json!({ "phone": "3" }), SetOptions::replace())
            .await
            .unwrap();
        assert_eq!(
            store.get_document("users", "alice").await.unwrap().unwrap(),
            json!({ "phone": "3" })
        );
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = create_test_store();
        let err = store
            .update_document("families", "123456", json!({ "isArchived": true }))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_subscription_sees_writes() {
        let store = create_test_store();
        let mut rx = store.subscribe("families", "123456").await.unwrap();
        assert!(rx.borrow_and_update().is_none());

        store
            .set_document("families", "123456", json!({ "code": "123456" }), SetOptions::replace())
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap()["code"], "123456");

        assert!(store.delete("families", "123456").unwrap());
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_refresh_only_publishes_changes() {
        let store = create_test_store();
        store
            .set_document("families", "123456", json!({ "code": "123456" }), SetOptions::replace())
            .await
            .unwrap();
        let _rx = store.subscribe("families", "123456").await.unwrap();

        assert_eq!(store.refresh_watched().unwrap(), 0);

        // Simulate another process writing behind our back.
        store
            .lock()
            .execute(
                "UPDATE documents SET data = ?1 WHERE collection = 'families' AND id = '123456'",
                [r#"{"code":"123456","isArchived":true}"#],
            )
            .unwrap();
        assert_eq!(store.refresh_watched().unwrap(), 1);
        assert!(!store.refresh("families", "123456").unwrap());
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let store = create_test_store();
        assert_eq!(store.stats().unwrap().total_documents, 0);

        for id in ["111111", "222222"] {
            store
                .set_document("families", id, json!({ "code": id }), SetOptions::replace())
                .await
                .unwrap();
        }
        store
            .set_document("users", "alice", json!({}), SetOptions::replace())
            .await
            .unwrap();

        let families = store.list("families").unwrap();
        assert_eq!(families.len(), 2);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_documents, 3);
        assert!(stats.last_write.is_some());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_reported() {
        let store = create_test_store();
        store
            .lock()
            .execute(
                "INSERT INTO documents (collection, id, data, updated_at) VALUES ('users', 'x', 'not json', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let err = store.get_document("users", "x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidDocument { .. }));
    }

    #[test]
    fn test_open_creates_file() {
        let dir = std::env::temp_dir().join(format!("haven-store-test-{}", std::process::id()));
        let path = dir.join("nested").join("haven.db");

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert!(path.exists());

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
