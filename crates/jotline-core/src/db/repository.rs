//! Record repository implementation
//!
//! Every local mutation goes through this repository and marks the row
//! dirty, which makes the dirty flag the push queue.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::error::{Error, Result};
use crate::models::{CaptureState, EntityKind, LocalRecord, RecordId, RecordStatus, SyncRecord};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

const RECORD_COLUMNS: &str =
    "entity, id, status, last_modified, payload, dirty, revision, local_path, created_at";

/// Trait for local record storage operations
pub trait RecordRepository {
    /// Create a new record with a fresh id, marked dirty
    fn create(&self, entity: EntityKind, fields: Map<String, Value>) -> Result<LocalRecord>;

    /// Insert a locally built record (pre-generated id), marked dirty
    fn insert_new(
        &self,
        entity: EntityKind,
        record: &SyncRecord,
        local_path: Option<&str>,
    ) -> Result<LocalRecord>;

    /// Get a record by ID regardless of status
    fn get(&self, entity: EntityKind, id: &RecordId) -> Result<Option<LocalRecord>>;

    /// List active records, newest first
    fn list_active(&self, entity: EntityKind, limit: usize, offset: usize)
        -> Result<Vec<LocalRecord>>;

    /// Replace an active record's payload and mark it dirty
    fn update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        fields: Map<String, Value>,
    ) -> Result<LocalRecord>;

    /// Soft delete: flip status to deleted and mark dirty
    fn delete(&self, entity: EntityKind, id: &RecordId) -> Result<()>;

    /// Records with unpushed local mutations
    fn list_dirty(&self, entity: EntityKind) -> Result<Vec<LocalRecord>>;

    /// Count dirty records, for one collection or all of them
    fn count_dirty(&self, entity: Option<EntityKind>) -> Result<usize>;

    /// Overwrite (or insert) a record with the server's version and clear dirty
    fn apply_remote(&self, entity: EntityKind, record: &SyncRecord) -> Result<()>;

    /// Clear dirty after a push ack, unless the row changed since `revision`.
    /// The ack timestamp is recorded either way.
    fn mark_pushed(
        &self,
        entity: EntityKind,
        id: &RecordId,
        revision: i64,
        server_timestamp: i64,
    ) -> Result<bool>;

    /// Persist the local-only cached blob path
    fn set_local_path(&self, entity: EntityKind, id: &RecordId, path: Option<&str>)
        -> Result<()>;

    /// Captures in the given local lifecycle state
    fn list_captures_in_state(&self, state: CaptureState) -> Result<Vec<LocalRecord>>;

    /// Set a capture's lifecycle state, tombstoned or not, and mark it for push
    fn set_capture_state(&self, id: &RecordId, state: CaptureState) -> Result<()>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row selected with `RECORD_COLUMNS`
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<LocalRecord> {
        let entity: String = row.get(0)?;
        let id: String = row.get(1)?;
        let status: String = row.get(2)?;
        let payload: String = row.get(4)?;

        let entity = entity
            .parse::<EntityKind>()
            .map_err(|error| conversion_error(0, error))?;
        let id = id
            .parse::<RecordId>()
            .map_err(|error| conversion_error(1, error))?;
        let status = status
            .parse::<RecordStatus>()
            .map_err(|error| conversion_error(2, error))?;
        let fields = serde_json::from_str::<Map<String, Value>>(&payload)
            .map_err(|error| conversion_error(4, error))?;

        Ok(LocalRecord {
            entity,
            record: SyncRecord {
                id,
                last_modified: row.get(3)?,
                status,
                fields,
            },
            dirty: row.get::<_, i32>(5)? != 0,
            revision: row.get(6)?,
            local_path: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<LocalRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt
            .query_map(params, Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn require(&self, entity: EntityKind, id: &RecordId) -> Result<LocalRecord> {
        self.get(entity, id)?
            .ok_or_else(|| Error::NotFound(format!("{entity}/{id}")))
    }
}

fn conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(error))
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn create(&self, entity: EntityKind, fields: Map<String, Value>) -> Result<LocalRecord> {
        let record = SyncRecord::new(RecordId::new(), fields);
        self.insert_new(entity, &record, None)
    }

    fn insert_new(
        &self,
        entity: EntityKind,
        record: &SyncRecord,
        local_path: Option<&str>,
    ) -> Result<LocalRecord> {
        let now = chrono::Utc::now().timestamp_millis();
        let payload = serde_json::to_string(&record.fields)?;

        self.conn.execute(
            "INSERT INTO records (entity, id, status, last_modified, payload, dirty, revision, local_path, created_at)
             VALUES (?, ?, ?, 0, ?, 1, 1, ?, ?)",
            params![
                entity.as_str(),
                record.id.as_str(),
                record.status.as_str(),
                payload,
                local_path,
                now
            ],
        )?;

        self.require(entity, &record.id)
    }

    fn get(&self, entity: EntityKind, id: &RecordId) -> Result<Option<LocalRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE entity = ? AND id = ?"),
                params![entity.as_str(), id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list_active(
        &self,
        entity: EntityKind,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LocalRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE entity = ? AND status = 'active'
                 ORDER BY created_at DESC, id DESC
                 LIMIT ? OFFSET ?"
            ),
            params![entity.as_str(), limit as i64, offset as i64],
        )
    }

    fn update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        fields: Map<String, Value>,
    ) -> Result<LocalRecord> {
        let payload = serde_json::to_string(&fields)?;

        let rows = self.conn.execute(
            "UPDATE records SET payload = ?, dirty = 1, revision = revision + 1
             WHERE entity = ? AND id = ? AND status = 'active'",
            params![payload, entity.as_str(), id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{entity}/{id}")));
        }

        self.require(entity, id)
    }

    fn delete(&self, entity: EntityKind, id: &RecordId) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE records SET status = 'deleted', dirty = 1, revision = revision + 1
             WHERE entity = ? AND id = ? AND status = 'active'",
            params![entity.as_str(), id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{entity}/{id}")));
        }

        Ok(())
    }

    fn list_dirty(&self, entity: EntityKind) -> Result<Vec<LocalRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE entity = ? AND dirty = 1
                 ORDER BY created_at ASC, id ASC"
            ),
            params![entity.as_str()],
        )
    }

    fn count_dirty(&self, entity: Option<EntityKind>) -> Result<usize> {
        let count: i64 = match entity {
            Some(entity) => self.conn.query_row(
                "SELECT COUNT(*) FROM records WHERE entity = ? AND dirty = 1",
                params![entity.as_str()],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM records WHERE dirty = 1",
                [],
                |row| row.get(0),
            )?,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn apply_remote(&self, entity: EntityKind, record: &SyncRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let payload = serde_json::to_string(&record.fields)?;

        self.conn.execute(
            "INSERT INTO records (entity, id, status, last_modified, payload, dirty, revision, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6)
             ON CONFLICT(entity, id) DO UPDATE SET
                status = excluded.status,
                last_modified = excluded.last_modified,
                payload = excluded.payload,
                dirty = 0",
            params![
                entity.as_str(),
                record.id.as_str(),
                record.status.as_str(),
                record.last_modified,
                payload,
                now
            ],
        )?;

        Ok(())
    }

    fn mark_pushed(
        &self,
        entity: EntityKind,
        id: &RecordId,
        revision: i64,
        server_timestamp: i64,
    ) -> Result<bool> {
        let cleared = self.conn.execute(
            "UPDATE records SET dirty = 0, last_modified = MAX(last_modified, ?1)
             WHERE entity = ?2 AND id = ?3 AND revision = ?4 AND dirty = 1",
            params![server_timestamp, entity.as_str(), id.as_str(), revision],
        )? == 1;

        if !cleared {
            // Edited mid-push: stays queued, but the server has seen this id.
            self.conn.execute(
                "UPDATE records SET last_modified = MAX(last_modified, ?1)
                 WHERE entity = ?2 AND id = ?3",
                params![server_timestamp, entity.as_str(), id.as_str()],
            )?;
        }

        Ok(cleared)
    }

    fn set_local_path(
        &self,
        entity: EntityKind,
        id: &RecordId,
        path: Option<&str>,
    ) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE records SET local_path = ? WHERE entity = ? AND id = ?",
            params![path, entity.as_str(), id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{entity}/{id}")));
        }

        Ok(())
    }

    fn list_captures_in_state(&self, state: CaptureState) -> Result<Vec<LocalRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE entity = 'captures' AND json_extract(payload, '$.state') = ?
                 ORDER BY created_at ASC"
            ),
            params![state.as_str()],
        )
    }

    fn set_capture_state(&self, id: &RecordId, state: CaptureState) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE records
             SET payload = json_set(payload, '$.state', ?1), dirty = 1, revision = revision + 1
             WHERE entity = 'captures' AND id = ?2",
            params![state.as_str(), id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{}/{id}", EntityKind::Captures)));
        }

        Ok(())
    }
}
