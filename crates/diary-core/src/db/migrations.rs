//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: events + sync queue
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS voiding_events (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            occurred_at_ms INTEGER NOT NULL,
            local_date TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            sync_state TEXT NOT NULL,
            updated_at_ms INTEGER NOT NULL,
            memo TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_events_owner_date
            ON voiding_events(owner_id, local_date, is_deleted);
        CREATE INDEX IF NOT EXISTS idx_events_occurred
            ON voiding_events(occurred_at_ms DESC);
        CREATE INDEX IF NOT EXISTS idx_events_sync_state
            ON voiding_events(sync_state);
        -- No foreign key on event_id: a queue row outliving its event is an
        -- expected state, cleaned up by the drain instead of rejected here.
        CREATE TABLE IF NOT EXISTS sync_queue (
            queue_id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            action TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_queue_retry ON sync_queue(retry_count ASC);
        CREATE INDEX IF NOT EXISTS idx_queue_event ON sync_queue(event_id);
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
