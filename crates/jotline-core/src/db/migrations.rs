//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Migration to version 1: records, cursors and sync metadata
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS records (
            entity TEXT NOT NULL,
            id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            last_modified INTEGER NOT NULL DEFAULT 0,
            payload TEXT NOT NULL DEFAULT '{}',
            dirty INTEGER NOT NULL DEFAULT 0,
            revision INTEGER NOT NULL DEFAULT 0,
            local_path TEXT,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (entity, id)
        );
        CREATE INDEX IF NOT EXISTS idx_records_dirty ON records(entity, dirty);
        CREATE INDEX IF NOT EXISTS idx_records_active ON records(entity, status, created_at DESC);
        CREATE TABLE IF NOT EXISTS sync_cursors (
            entity TEXT PRIMARY KEY,
            last_pulled_at INTEGER NOT NULL DEFAULT 0,
            last_pushed_at INTEGER NOT NULL DEFAULT 0,
            last_status TEXT,
            last_error TEXT
        );
        CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (1);",
    )?;

    tx.commit()?;
    tracing::info!("Migrated local database to version 1");
    Ok(())
}

/// Migration to version 2: index captures by local lifecycle state for crash recovery
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_records_capture_state
            ON records(entity, json_extract(payload, '$.state'));
        INSERT INTO schema_version (version) VALUES (2);",
    )?;

    tx.commit()?;
    tracing::info!("Migrated local database to version {CURRENT_VERSION}");
    Ok(())
}
