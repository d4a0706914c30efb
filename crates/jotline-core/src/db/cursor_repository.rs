//! Sync cursor repository implementation

use crate::error::Result;
use crate::models::{CursorStatus, EntityKind, SyncCursor};
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for sync watermark and sync metadata storage
pub trait CursorRepository {
    /// Load the cursor for a collection (a fresh cursor if none was saved)
    fn load(&self, entity: EntityKind) -> Result<SyncCursor>;

    /// Move `last_pulled_at` forward; a smaller timestamp leaves it unchanged.
    /// Returns the stored watermark.
    fn advance_pulled(&self, entity: EntityKind, timestamp: i64) -> Result<i64>;

    /// Reset `last_pulled_at` to zero. Reserved for the initial full sync.
    fn reset_pulled(&self, entity: EntityKind) -> Result<()>;

    /// Record the server timestamp of an acknowledged push
    fn record_pushed(&self, entity: EntityKind, timestamp: i64) -> Result<()>;

    /// Record the outcome of the latest sync attempt
    fn record_outcome(
        &self,
        entity: EntityKind,
        status: CursorStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Read a sync metadata value
    fn get_meta(&self, key: &str) -> Result<Option<String>>;

    /// Write a sync metadata value
    fn set_meta(&self, key: &str, value: &str) -> Result<()>;
}

/// `SQLite` implementation of `CursorRepository`
pub struct SqliteCursorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCursorRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn ensure_row(&self, entity: EntityKind) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sync_cursors (entity) VALUES (?)",
            params![entity.as_str()],
        )?;
        Ok(())
    }
}

impl CursorRepository for SqliteCursorRepository<'_> {
    fn load(&self, entity: EntityKind) -> Result<SyncCursor> {
        let row = self
            .conn
            .query_row(
                "SELECT last_pulled_at, last_pushed_at, last_status, last_error
                 FROM sync_cursors WHERE entity = ?",
                params![entity.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((last_pulled_at, last_pushed_at, last_status, last_error)) = row else {
            return Ok(SyncCursor::new(entity));
        };

        Ok(SyncCursor {
            entity,
            last_pulled_at,
            last_pushed_at,
            last_status: last_status.and_then(|status| status.parse().ok()),
            last_error,
        })
    }

    fn advance_pulled(&self, entity: EntityKind, timestamp: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_cursors (entity, last_pulled_at) VALUES (?1, MAX(?2, 0))
             ON CONFLICT(entity) DO UPDATE SET
                last_pulled_at = MAX(last_pulled_at, excluded.last_pulled_at)",
            params![entity.as_str(), timestamp],
        )?;

        let stored = self.conn.query_row(
            "SELECT last_pulled_at FROM sync_cursors WHERE entity = ?",
            params![entity.as_str()],
            |row| row.get(0),
        )?;
        Ok(stored)
    }

    fn reset_pulled(&self, entity: EntityKind) -> Result<()> {
        self.ensure_row(entity)?;
        self.conn.execute(
            "UPDATE sync_cursors SET last_pulled_at = 0 WHERE entity = ?",
            params![entity.as_str()],
        )?;
        Ok(())
    }

    fn record_pushed(&self, entity: EntityKind, timestamp: i64) -> Result<()> {
        self.ensure_row(entity)?;
        self.conn.execute(
            "UPDATE sync_cursors SET last_pushed_at = MAX(last_pushed_at, ?) WHERE entity = ?",
            params![timestamp, entity.as_str()],
        )?;
        Ok(())
    }

    fn record_outcome(
        &self,
        entity: EntityKind,
        status: CursorStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.ensure_row(entity)?;
        self.conn.execute(
            "UPDATE sync_cursors SET last_status = ?, last_error = ? WHERE entity = ?",
            params![status.as_str(), error, entity.as_str()],
        )?;
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}
