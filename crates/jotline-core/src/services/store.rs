//! Shared local store service used by the sync engine and by clients.

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex};

use crate::db::{
    CursorRepository, Database, RecordRepository, SqliteCursorRepository, SqliteRecordRepository,
};
use crate::models::{
    Capture, EntityKind, LocalRecord, RecordChange, RecordId, SyncCursor, SyncRecord,
};
use crate::Result;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Thread-safe handle to the local database.
///
/// All writes are serialized through one connection, so at most one write
/// transaction is in flight. Every committed change to a record is announced
/// on a broadcast channel so observers never have to poll.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    changes: broadcast::Sender<RecordChange>,
}

impl LocalStore {
    /// Open a local store at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        tracing::info!("Opened local store at {}", db_path.display());
        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory local store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?, None))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            changes,
        }
    }

    /// Path of the backing database file, if any.
    pub fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Subscribe to record change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.changes.subscribe()
    }

    pub(crate) fn notify(&self, entity: EntityKind, id: RecordId) {
        // No receivers is fine.
        let _ = self.changes.send(RecordChange { entity, id });
    }

    pub(crate) fn notify_all(&self, entity: EntityKind, ids: impl IntoIterator<Item = RecordId>) {
        for id in ids {
            self.notify(entity, id);
        }
    }

    /// Run `f` against the connection without a transaction.
    pub async fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.db.lock().await;
        f(db.connection())
    }

    /// Run `f` inside one write transaction; any error rolls the whole thing back.
    pub async fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Create a new record, marked for push.
    pub async fn create_record(
        &self,
        entity: EntityKind,
        fields: Map<String, Value>,
    ) -> Result<LocalRecord> {
        let record = self
            .read(|conn| SqliteRecordRepository::new(conn).create(entity, fields))
            .await?;
        self.notify(entity, record.id());
        Ok(record)
    }

    /// Create a capture, optionally pointing at the audio file being written.
    pub async fn create_capture(
        &self,
        capture: &Capture,
        local_path: Option<&str>,
    ) -> Result<LocalRecord> {
        let record = SyncRecord::new(RecordId::new(), capture.to_fields()?);
        let stored = self
            .read(|conn| {
                SqliteRecordRepository::new(conn).insert_new(
                    EntityKind::Captures,
                    &record,
                    local_path,
                )
            })
            .await?;
        self.notify(EntityKind::Captures, stored.id());
        Ok(stored)
    }

    /// Replace a record's payload, marking it for push.
    pub async fn update_record(
        &self,
        entity: EntityKind,
        id: &RecordId,
        fields: Map<String, Value>,
    ) -> Result<LocalRecord> {
        let record = self
            .read(|conn| SqliteRecordRepository::new(conn).update(entity, id, fields))
            .await?;
        self.notify(entity, *id);
        Ok(record)
    }

    /// Soft-delete a record, marking it for push.
    pub async fn delete_record(&self, entity: EntityKind, id: &RecordId) -> Result<()> {
        self.read(|conn| SqliteRecordRepository::new(conn).delete(entity, id))
            .await?;
        self.notify(entity, *id);
        Ok(())
    }

    /// Fetch a record by id regardless of status.
    pub async fn get_record(
        &self,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<Option<LocalRecord>> {
        self.read(|conn| SqliteRecordRepository::new(conn).get(entity, id))
            .await
    }

    /// List active records newest-first.
    pub async fn list_active(
        &self,
        entity: EntityKind,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LocalRecord>> {
        self.read(|conn| SqliteRecordRepository::new(conn).list_active(entity, limit, offset))
            .await
    }

    /// Remember where a record's blob is cached. Local-only; never pushed.
    pub async fn set_local_path(
        &self,
        entity: EntityKind,
        id: &RecordId,
        path: Option<&str>,
    ) -> Result<()> {
        self.read(|conn| SqliteRecordRepository::new(conn).set_local_path(entity, id, path))
            .await?;
        self.notify(entity, *id);
        Ok(())
    }

    /// Count records waiting to be pushed.
    pub async fn count_dirty(&self, entity: Option<EntityKind>) -> Result<usize> {
        self.read(|conn| SqliteRecordRepository::new(conn).count_dirty(entity))
            .await
    }

    /// Load the sync cursor for a collection.
    pub async fn cursor(&self, entity: EntityKind) -> Result<SyncCursor> {
        self.read(|conn| SqliteCursorRepository::new(conn).load(entity))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn in_memory_create_and_list_roundtrip() {
        let store = LocalStore::open_in_memory().unwrap();

        store
            .create_record(EntityKind::Thoughts, fields(json!({ "body": "hello core" })))
            .await
            .unwrap();
        let records = store.list_active(EntityKind::Thoughts, 10, 0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record.fields["body"], "hello core");
        assert_eq!(store.count_dirty(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mutations_are_broadcast() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut changes = store.subscribe();

        let record = store
            .create_record(EntityKind::Ideas, fields(json!({ "title": "a" })))
            .await
            .unwrap();
        store.delete_record(EntityKind::Ideas, &record.id()).await.unwrap();

        let first = changes.recv().await.unwrap();
        let second = changes.recv().await.unwrap();
        assert_eq!(first, RecordChange { entity: EntityKind::Ideas, id: record.id() });
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let store = LocalStore::open_in_memory().unwrap();

        let result: Result<()> = store
            .transaction(|conn| {
                SqliteRecordRepository::new(conn)
                    .create(EntityKind::Todos, fields(json!({ "title": "lost" })))?;
                Err(crate::Error::InvalidInput("boom".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(store.count_dirty(Some(EntityKind::Todos)).await.unwrap(), 0);
    }

    #[test]
    fn open_path_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("jotline.db");
        let store = LocalStore::open_path(&path).unwrap();
        assert_eq!(store.db_path(), Some(&path));
        assert!(path.exists());
    }
}
