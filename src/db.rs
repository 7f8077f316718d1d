use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::engine::store::{KeyValueBackend, ProgressRecord, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCollection {
    pub collection_id: String,
    pub completed: usize,
    pub updated_at: String,
}

/// SQLite key-value table holding one JSON progress record per collection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS progress (
                collection_id TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_progress_updated_at ON progress(updated_at DESC);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_value(&self, collection_id: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM progress WHERE collection_id = ?1",
                params![collection_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| {
            serde_json::from_str(&raw)
                .with_context(|| format!("corrupt progress entry for {collection_id}"))
        })
        .transpose()
    }

    pub fn set_value(&self, collection_id: &str, value: &Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            r#"
            INSERT INTO progress (collection_id, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(collection_id) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![collection_id, value.to_string(), now],
        )?;
        Ok(())
    }

    pub fn remove_value(&self, collection_id: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "DELETE FROM progress WHERE collection_id = ?1",
            params![collection_id],
        )?;
        Ok(changed > 0)
    }

    pub fn list_entries(&self) -> Result<Vec<StoredCollection>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT collection_id, value, updated_at FROM progress ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (collection_id, raw, updated_at) = row?;
            // Unreadable rows still show up, as having nothing completed.
            let completed = serde_json::from_str::<Value>(&raw)
                .map(|value| ProgressRecord::from_value(&value).len())
                .unwrap_or_default();
            out.push(StoredCollection {
                collection_id,
                completed,
                updated_at,
            });
        }
        Ok(out)
    }
}

async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| StoreError::Aborted(err.to_string()))?
        .map_err(|err| StoreError::Backend(format!("{err:#}")))
}

#[async_trait]
impl KeyValueBackend for Database {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let db = self.clone();
        let key = key.to_string();
        blocking(move || db.get_value(&key)).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let db = self.clone();
        let key = key.to_string();
        blocking(move || db.set_value(&key, &value)).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let db = self.clone();
        let key = key.to_string();
        blocking(move || db.remove_value(&key).map(|_| ())).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::engine::ids::{CollectionId, ItemId};
    use crate::engine::notify::Notifier;
    use crate::engine::store::ProgressStore;

    fn temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(&dir.path().join("nested").join("progress.db")).expect("open");
        db.migrate().expect("migrate");
        (dir, db)
    }

    #[test]
    fn values_round_trip_and_remove() {
        let (_dir, db) = temp_db();
        assert_eq!(db.get_value("PL1").expect("get"), None);

        db.set_value("PL1", &json!({"a": true})).expect("set");
        db.set_value("PL1", &json!({"a": true, "b": true})).expect("overwrite");
        assert_eq!(
            db.get_value("PL1").expect("get"),
            Some(json!({"a": true, "b": true}))
        );

        assert!(db.remove_value("PL1").expect("remove"));
        assert!(!db.remove_value("PL1").expect("remove again"));
        assert_eq!(db.get_value("PL1").expect("get"), None);
    }

    #[test]
    fn migrate_is_repeatable() {
        let (_dir, db) = temp_db();
        db.set_value("PL1", &json!({"a": true})).expect("set");
        db.migrate().expect("second migrate");
        assert_eq!(db.get_value("PL1").expect("get"), Some(json!({"a": true})));
    }

    #[test]
    fn list_counts_completed_items_and_tolerates_garbage() {
        let (_dir, db) = temp_db();
        db.set_value("PL1", &json!({"a": true, "b": false, "c": 1}))
            .expect("set");
        db.conn()
            .execute(
                "INSERT INTO progress (collection_id, value, updated_at) VALUES ('PLX', 'not json', '2000-01-01T00:00:00Z')",
                [],
            )
            .expect("raw insert");

        let mut entries = db.list_entries().expect("list");
        entries.sort_by(|a, b| a.collection_id.cmp(&b.collection_id));
        let summary = entries
            .iter()
            .map(|entry| (entry.collection_id.as_str(), entry.completed))
            .collect::<Vec<_>>();
        assert_eq!(summary, vec![("PL1", 2), ("PLX", 0)]);
        assert!(db.get_value("PLX").is_err());
    }

    #[tokio::test]
    async fn store_persists_through_sqlite_backend() {
        let (dir, db) = temp_db();
        let store = ProgressStore::new(Arc::new(db), Notifier::new());
        let pl = CollectionId::new("PL1").expect("collection");
        let item = ItemId::new("a").expect("item");

        assert!(store.mark_complete(&pl, &item).await);
        assert!(!store.mark_complete(&pl, &item).await);
        drop(store);

        let reopened = Database::open(&dir.path().join("nested").join("progress.db")).expect("reopen");
        let store = ProgressStore::new(Arc::new(reopened), Notifier::new());
        assert!(store.get(&pl).await.contains(&item));
        assert!(store.clear(&pl).await);
        assert!(store.get(&pl).await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_row_reads_as_empty_and_blocks_writes() {
        let (_dir, db) = temp_db();
        db.conn()
            .execute(
                "INSERT INTO progress (collection_id, value, updated_at) VALUES ('PL1', '{', '2000-01-01T00:00:00Z')",
                [],
            )
            .expect("raw insert");
        let store = ProgressStore::new(Arc::new(db), Notifier::new());
        let pl = CollectionId::new("PL1").expect("collection");

        assert!(store.get(&pl).await.is_empty());
        assert!(!store.mark_complete(&pl, &ItemId::new("a").expect("item")).await);
    }
}
