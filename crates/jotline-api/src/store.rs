//! Server-side record store.
//!
//! Every row is scoped by the owning user. `last_modified` comes from a
//! strictly monotonic clock shared by all collections, so no two rows ever
//! carry the same stamp and an exclusive `since` boundary neither skips nor
//! duplicates records across pages.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use jotline_core::models::{EntityKind, RecordId, RecordStatus, SyncRecord};
use jotline_core::util::unix_millis_now;
use jotline_core::sync::{
    ChangeSet, Conflict, ConflictType, PullQuery, PullResponse, PushRecord, PushRequest,
    PushResponse,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;

const CURRENT_VERSION: i32 = 1;

/// Keys owned by the sync envelope; never stored inside the payload.
const ENVELOPE_KEYS: [&str; 3] = ["id", "last_modified", "status"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    InvalidRecord(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

struct Inner {
    conn: Connection,
    /// Highest `last_modified` ever assigned.
    clock: i64,
}

/// Advance the clock to `max(now, last + 1)`.
fn next_stamp(clock: &mut i64) -> i64 {
    *clock = unix_millis_now().max(*clock + 1);
    *clock
}

/// Shared handle to the server database.
#[derive(Clone)]
pub struct ServerStore {
    inner: Arc<Mutex<Inner>>,
}

impl ServerStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> StoreResult<Self> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .ok();
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrate(&mut conn)?;

        let clock: i64 = conn.query_row(
            "SELECT COALESCE(MAX(last_modified), 0) FROM server_records",
            [],
            |row| row.get(0),
        )?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { conn, clock })),
        })
    }

    /// One page of `user_id`'s changes newer than `query.since`, ordered by
    /// `(last_modified, id)`. `limit` is clamped to `1..=max_page_size`.
    pub async fn pull(
        &self,
        user_id: &str,
        query: &PullQuery,
        max_page_size: usize,
    ) -> StoreResult<PullResponse> {
        let limit = query.limit.clamp(1, max_page_size.max(1));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);
        let entity = query.entity.as_str();

        let inner = self.inner.lock().await;
        let conn = &inner.conn;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM server_records
             WHERE user_id = ?1 AND entity = ?2 AND last_modified > ?3",
            params![user_id, entity, query.since],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, status, last_modified, payload FROM server_records
             WHERE user_id = ?1 AND entity = ?2 AND last_modified > ?3
             ORDER BY last_modified ASC, id ASC
             LIMIT ?4 OFFSET ?5",
        )?;
        let rows = stmt
            .query_map(
                params![user_id, entity, query.since, limit, offset],
                read_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut changes = ChangeSet::default();
        let mut timestamp = query.since;
        for row in rows {
            let record = row.into_record()?;
            timestamp = timestamp.max(record.last_modified);
            if record.is_deleted() {
                changes.deleted.push(record);
            } else {
                changes.updated.push(record);
            }
        }

        Ok(PullResponse {
            changes,
            timestamp,
            total: Some(u64::try_from(total).unwrap_or(0)),
        })
    }

    /// Apply a push in one transaction.
    ///
    /// A record whose stored `last_modified` is newer than the client's
    /// `last_pulled_at` is not applied; the stored version comes back as a
    /// conflict instead.
    pub async fn push(&self, user_id: &str, request: &PushRequest) -> StoreResult<PushResponse> {
        let mut batches = Vec::with_capacity(request.changes.len());
        for (name, change_set) in &request.changes {
            let entity = EntityKind::from_str(name)
                .map_err(|_| StoreError::InvalidRecord(format!("Unknown entity: {name}")))?;
            batches.push((entity, change_set));
        }

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let tx = inner.conn.transaction()?;
        let mut response = PushResponse::default();
        let mut high_water = None;

        for (entity, change_set) in batches {
            let pushed = change_set
                .updated
                .iter()
                .map(|record| (record, RecordStatus::Active))
                .chain(
                    change_set
                        .deleted
                        .iter()
                        .map(|record| (record, RecordStatus::Deleted)),
                );
            for (record, status) in pushed {
                if let Some(existing) = load(&tx, user_id, entity, &record.id)? {
                    if existing.last_modified > request.last_pulled_at {
                        let conflict_type = if existing.is_deleted() {
                            ConflictType::DeletedRemotely
                        } else {
                            ConflictType::LostUpdate
                        };
                        tracing::debug!(
                            entity = %entity,
                            record_id = %record.id,
                            conflict = conflict_type.as_str(),
                            "Rejected stale push"
                        );
                        response
                            .conflicts
                            .push(Conflict::server_wins(entity, conflict_type, existing));
                        continue;
                    }
                }

                let stamp = next_stamp(&mut inner.clock);
                upsert(&tx, user_id, entity, record, status, stamp)?;
                high_water = Some(stamp);
                response.synced_record_ids.push(record.id);
            }
        }

        tx.commit()?;
        response.timestamp = high_water.unwrap_or(inner.clock);
        Ok(response)
    }

    /// Current version of one record, if the user owns it.
    pub async fn get(
        &self,
        user_id: &str,
        entity: EntityKind,
        id: &RecordId,
    ) -> StoreResult<Option<SyncRecord>> {
        let inner = self.inner.lock().await;
        load(&inner.conn, user_id, entity, id)
    }

    /// Whether one of the user's active captures references `object_key` as
    /// its audio.
    pub async fn owns_blob(&self, user_id: &str, object_key: &str) -> StoreResult<bool> {
        let inner = self.inner.lock().await;
        let owned = inner.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM server_records
                WHERE user_id = ?1 AND entity = ?2 AND status = ?3
                  AND ltrim(json_extract(payload, '$.audio_url'), '/') = ?4
            )",
            params![
                user_id,
                EntityKind::Captures.as_str(),
                RecordStatus::Active.as_str(),
                object_key
            ],
            |row| row.get(0),
        )?;
        Ok(owned)
    }

    /// Highest stamp assigned so far.
    pub async fn clock(&self) -> i64 {
        self.inner.lock().await.clock
    }
}

struct StoredRow {
    id: String,
    status: String,
    last_modified: i64,
    payload: String,
}

impl StoredRow {
    fn into_record(self) -> StoreResult<SyncRecord> {
        let id = RecordId::from_str(&self.id)
            .map_err(|error| StoreError::InvalidRecord(format!("Invalid stored id: {error}")))?;
        let status = RecordStatus::from_str(&self.status)
            .map_err(|error| StoreError::InvalidRecord(error.to_string()))?;
        let fields: Map<String, Value> = serde_json::from_str(&self.payload)?;
        Ok(SyncRecord {
            id,
            last_modified: self.last_modified,
            status,
            fields,
        })
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        id: row.get(0)?,
        status: row.get(1)?,
        last_modified: row.get(2)?,
        payload: row.get(3)?,
    })
}

fn load(
    conn: &Connection,
    user_id: &str,
    entity: EntityKind,
    id: &RecordId,
) -> StoreResult<Option<SyncRecord>> {
    conn.query_row(
        "SELECT id, status, last_modified, payload FROM server_records
         WHERE user_id = ?1 AND entity = ?2 AND id = ?3",
        params![user_id, entity.as_str(), id.as_str()],
        read_row,
    )
    .optional()?
    .map(StoredRow::into_record)
    .transpose()
}

fn upsert(
    tx: &Transaction<'_>,
    user_id: &str,
    entity: EntityKind,
    record: &PushRecord,
    status: RecordStatus,
    stamp: i64,
) -> StoreResult<()> {
    let mut fields = record.fields.clone();
    for key in ENVELOPE_KEYS {
        fields.remove(key);
    }
    let payload = serde_json::to_string(&fields)?;
    tx.execute(
        "INSERT INTO server_records (user_id, entity, id, status, last_modified, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id, entity, id) DO UPDATE SET
            status = excluded.status,
            last_modified = excluded.last_modified,
            payload = excluded.payload",
        params![
            user_id,
            entity.as_str(),
            record.id.as_str(),
            status.as_str(),
            stamp,
            payload
        ],
    )?;
    Ok(())
}

fn migrate(conn: &mut Connection) -> StoreResult<()> {
    let version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS server_records (
            user_id TEXT NOT NULL,
            entity TEXT NOT NULL,
            id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            last_modified INTEGER NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (user_id, entity, id)
        );
        CREATE INDEX IF NOT EXISTS idx_server_records_changes
            ON server_records(user_id, entity, last_modified, id);
        INSERT INTO schema_version (version) VALUES (1);",
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use jotline_core::sync::PushChangeSet;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn push_request(
        entity: EntityKind,
        last_pulled_at: i64,
        updated: Vec<PushRecord>,
        deleted: Vec<PushRecord>,
    ) -> PushRequest {
        PushRequest {
            last_pulled_at,
            changes: BTreeMap::from([(
                entity.as_str().to_string(),
                PushChangeSet { updated, deleted },
            )]),
        }
    }

    fn record(title: &str) -> PushRecord {
        PushRecord {
            id: RecordId::new(),
            fields: fields(json!({ "title": title })),
        }
    }

    fn query(since: i64, limit: usize, offset: usize) -> PullQuery {
        PullQuery {
            entity: EntityKind::Ideas,
            since,
            limit,
            offset,
        }
    }

    async fn seed(store: &ServerStore, user: &str, count: usize) -> Vec<RecordId> {
        let records: Vec<PushRecord> = (0..count).map(|n| record(&format!("idea {n}"))).collect();
        let ids = records.iter().map(|record| record.id).collect();
        store
            .push(user, &push_request(EntityKind::Ideas, 0, records, Vec::new()))
            .await
            .unwrap();
        ids
    }

    #[tokio::test]
    async fn stamps_are_strictly_increasing() {
        let store = ServerStore::open_in_memory().unwrap();
        seed(&store, "user-a", 50).await;

        let page = store.pull("user-a", &query(0, 100, 0), 500).await.unwrap();
        let stamps: Vec<i64> = page.changes.updated.iter().map(|r| r.last_modified).collect();
        assert_eq!(stamps.len(), 50);
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(page.timestamp, *stamps.last().unwrap());
        assert_eq!(store.clock().await, page.timestamp);
    }

    #[tokio::test]
    async fn pagination_neither_duplicates_nor_skips() {
        let store = ServerStore::open_in_memory().unwrap();
        let mut expected = seed(&store, "user-a", 250).await;

        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            let page = store.pull("user-a", &query(0, 100, offset), 500).await.unwrap();
            assert_eq!(page.total, Some(250));
            let len = page.changes.len();
            seen.extend(page.changes.updated.iter().map(|record| record.id));
            offset += len;
            if len < 100 {
                break;
            }
        }

        expected.sort();
        seen.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn since_is_exclusive_and_empty_page_echoes_it() {
        let store = ServerStore::open_in_memory().unwrap();
        seed(&store, "user-a", 3).await;
        let all = store.pull("user-a", &query(0, 100, 0), 500).await.unwrap();
        let second = all.changes.updated[1].last_modified;

        let rest = store.pull("user-a", &query(second, 100, 0), 500).await.unwrap();
        assert_eq!(rest.changes.len(), 1);
        assert_eq!(rest.total, Some(1));

        let empty = store
            .pull("user-a", &query(all.timestamp, 100, 0), 500)
            .await
            .unwrap();
        assert!(empty.changes.is_empty());
        assert_eq!(empty.timestamp, all.timestamp);
    }

    #[tokio::test]
    async fn limit_is_clamped_to_max_page_size() {
        let store = ServerStore::open_in_memory().unwrap();
        seed(&store, "user-a", 30).await;

        let page = store.pull("user-a", &query(0, 1_000, 0), 10).await.unwrap();
        assert_eq!(page.changes.len(), 10);
        let page = store.pull("user-a", &query(0, 0, 0), 10).await.unwrap();
        assert_eq!(page.changes.len(), 1);
    }

    #[tokio::test]
    async fn blob_ownership_follows_the_users_captures() {
        let store = ServerStore::open_in_memory().unwrap();
        let capture = PushRecord {
            id: RecordId::new(),
            fields: fields(json!({
                "kind": "voice",
                "state": "ready",
                "audio_url": "/captures/user-a/voice.m4a"
            })),
        };
        store
            .push(
                "user-a",
                &push_request(EntityKind::Captures, 0, vec![capture.clone()], Vec::new()),
            )
            .await
            .unwrap();

        assert!(store.owns_blob("user-a", "captures/user-a/voice.m4a").await.unwrap());
        assert!(!store.owns_blob("user-b", "captures/user-a/voice.m4a").await.unwrap());
        assert!(!store.owns_blob("user-a", "captures/user-a/other.m4a").await.unwrap());

        let clock = store.clock().await;
        store
            .push(
                "user-a",
                &push_request(EntityKind::Captures, clock, Vec::new(), vec![capture]),
            )
            .await
            .unwrap();
        assert!(!store.owns_blob("user-a", "captures/user-a/voice.m4a").await.unwrap());
    }

    #[tokio::test]
    async fn users_never_see_each_other() {
        let store = ServerStore::open_in_memory().unwrap();
        let ids = seed(&store, "user-a", 2).await;
        seed(&store, "user-b", 5).await;

        let page = store.pull("user-a", &query(0, 100, 0), 500).await.unwrap();
        assert_eq!(page.total, Some(2));
        assert!(store.get("user-b", EntityKind::Ideas, &ids[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_push_yields_lost_update_with_server_version() {
        let store = ServerStore::open_in_memory().unwrap();
        let original = record("first");
        let id = original.id;
        let first = store
            .push("user-a", &push_request(EntityKind::Ideas, 0, vec![original], Vec::new()))
            .await
            .unwrap();
        assert_eq!(first.synced_record_ids, vec![id]);

        let stale = PushRecord {
            id,
            fields: fields(json!({ "title": "stale edit" })),
        };
        let response = store
            .push("user-a", &push_request(EntityKind::Ideas, 0, vec![stale], Vec::new()))
            .await
            .unwrap();

        assert!(response.synced_record_ids.is_empty());
        assert_eq!(response.conflicts.len(), 1);
        let conflict = &response.conflicts[0];
        assert_eq!(conflict.conflict_type, ConflictType::LostUpdate);
        assert_eq!(conflict.record_id, id);
        assert_eq!(conflict.server_version.fields["title"], json!("first"));
        assert_eq!(conflict.server_version.last_modified, first.timestamp);
        assert_eq!(response.timestamp, first.timestamp);
    }

    #[tokio::test]
    async fn push_against_tombstone_is_deleted_remotely() {
        let store = ServerStore::open_in_memory().unwrap();
        let doomed = record("doomed");
        let id = doomed.id;
        let deleted = store
            .push("user-a", &push_request(EntityKind::Ideas, 0, Vec::new(), vec![doomed]))
            .await
            .unwrap();

        let page = store.pull("user-a", &query(0, 100, 0), 500).await.unwrap();
        assert_eq!(page.changes.deleted.len(), 1);
        assert!(page.changes.updated.is_empty());

        let revived = PushRecord {
            id,
            fields: fields(json!({ "title": "revived" })),
        };
        let response = store
            .push(
                "user-a",
                &push_request(EntityKind::Ideas, deleted.timestamp - 1, vec![revived], Vec::new()),
            )
            .await
            .unwrap();
        assert_eq!(
            response.conflicts[0].conflict_type,
            ConflictType::DeletedRemotely
        );
    }

    #[tokio::test]
    async fn up_to_date_push_overwrites_and_strips_envelope_keys() {
        let store = ServerStore::open_in_memory().unwrap();
        let original = record("first");
        let id = original.id;
        let first = store
            .push("user-a", &push_request(EntityKind::Ideas, 0, vec![original], Vec::new()))
            .await
            .unwrap();

        let edit = PushRecord {
            id,
            fields: fields(json!({ "title": "second", "last_modified": 1, "status": "deleted" })),
        };
        let second = store
            .push(
                "user-a",
                &push_request(EntityKind::Ideas, first.timestamp, vec![edit], Vec::new()),
            )
            .await
            .unwrap();
        assert_eq!(second.synced_record_ids, vec![id]);
        assert!(second.timestamp > first.timestamp);

        let stored = store.get("user-a", EntityKind::Ideas, &id).await.unwrap().unwrap();
        assert_eq!(stored.last_modified, second.timestamp);
        assert_eq!(stored.status, RecordStatus::Active);
        assert_eq!(stored.fields, fields(json!({ "title": "second" })));
    }

    #[tokio::test]
    async fn unknown_entity_rejects_whole_push() {
        let store = ServerStore::open_in_memory().unwrap();
        let mut request = push_request(EntityKind::Ideas, 0, vec![record("kept out")], Vec::new());
        request
            .changes
            .insert("sketches".to_string(), PushChangeSet::default());

        assert!(matches!(
            store.push("user-a", &request).await,
            Err(StoreError::InvalidRecord(_))
        ));
        assert_eq!(store.clock().await, 0);
    }

    #[tokio::test]
    async fn clock_resumes_after_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.db");
        let high = {
            let store = ServerStore::open(&path).unwrap();
            seed(&store, "user-a", 3).await;
            store.clock().await
        };

        let reopened = ServerStore::open(&path).unwrap();
        assert_eq!(reopened.clock().await, high);
    }
}
