//! Event store repository

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{EventId, SyncState, VoidingEvent};

const SELECT_COLUMNS: &str =
    "id, owner_id, occurred_at_ms, local_date, is_deleted, sync_state, updated_at_ms, memo";

/// `SQLite` repository for voiding events.
///
/// Borrows a connection (or a transaction, which derefs to one) so that
/// callers control the transaction boundary.
pub struct SqliteEventStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteEventStore<'a> {
    #[must_use]
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Idempotent insert-or-replace keyed by the client-generated id
    pub fn upsert(&self, event: &VoidingEvent) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO voiding_events
             (id, owner_id, occurred_at_ms, local_date, is_deleted, sync_state, updated_at_ms, memo)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                event.id.as_str(),
                event.owner_id,
                event.occurred_at,
                event.local_date.to_string(),
                i32::from(event.deleted),
                event.sync_state.as_str(),
                event.updated_at,
                event.memo,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_many(&self, events: &[VoidingEvent]) -> Result<()> {
        for event in events {
            self.upsert(event)?;
        }
        Ok(())
    }

    /// Replace an existing row. Returns false when the row no longer exists;
    /// callers that care must check.
    pub fn update(&self, event: &VoidingEvent) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE voiding_events
             SET owner_id = ?, occurred_at_ms = ?, local_date = ?, is_deleted = ?,
                 sync_state = ?, updated_at_ms = ?, memo = ?
             WHERE id = ?",
            params![
                event.owner_id,
                event.occurred_at,
                event.local_date.to_string(),
                i32::from(event.deleted),
                event.sync_state.as_str(),
                event.updated_at,
                event.memo,
                event.id.as_str(),
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn get_by_id(&self, id: &EventId) -> Result<Option<VoidingEvent>> {
        let result = self.conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM voiding_events WHERE id = ?"),
            params![id.as_str()],
            parse_event,
        );

        match result {
            Ok(event) => Ok(Some(event)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Non-deleted events for one owner and date, newest first
    pub fn list_by_owner_and_date(&self, owner_id: &str, date: NaiveDate) -> Result<Vec<VoidingEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM voiding_events
             WHERE owner_id = ? AND local_date = ? AND is_deleted = 0
             ORDER BY occurred_at_ms DESC"
        ))?;

        let events = stmt
            .query_map(params![owner_id, date.to_string()], parse_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(events)
    }

    pub fn daily_count(&self, owner_id: &str, date: NaiveDate) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM voiding_events
             WHERE owner_id = ? AND local_date = ? AND is_deleted = 0",
            params![owner_id, date.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Per-day counts for one calendar month (`year_month` is `YYYY-MM`)
    pub fn monthly_counts(
        &self,
        owner_id: &str,
        year_month: &str,
    ) -> Result<BTreeMap<NaiveDate, i64>> {
        validate_year_month(year_month)?;

        let mut stmt = self.conn.prepare(
            "SELECT local_date, COUNT(*) FROM voiding_events
             WHERE owner_id = ? AND local_date LIKE ? AND is_deleted = 0
             GROUP BY local_date",
        )?;

        let rows = stmt.query_map(params![owner_id, format!("{year_month}-%")], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (date, count) = row?;
            let date = NaiveDate::from_str(&date)
                .map_err(|e| Error::InvalidInput(format!("stored local_date {date}: {e}")))?;
            counts.insert(date, count);
        }
        Ok(counts)
    }

    /// Events still awaiting upload or delete propagation for this owner
    pub fn pending_count(&self, owner_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM voiding_events
             WHERE owner_id = ?
               AND sync_state IN ('PENDING_CREATE', 'PENDING_DELETE')",
            params![owner_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn validate_year_month(year_month: &str) -> Result<()> {
    let valid = year_month.len() == 7
        && year_month.as_bytes()[4] == b'-'
        && NaiveDate::from_str(&format!("{year_month}-01")).is_ok();
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "year_month must be YYYY-MM, got {year_month}"
        )))
    }
}

fn parse_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<VoidingEvent> {
    let id: String = row.get(0)?;
    let local_date: String = row.get(3)?;
    let sync_state: String = row.get(5)?;
    Ok(VoidingEvent {
        id: id.parse().map_err(|e: uuid::Error| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        owner_id: row.get(1)?,
        occurred_at: row.get(2)?,
        local_date: NaiveDate::from_str(&local_date).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        deleted: row.get::<_, i32>(4)? != 0,
        sync_state: SyncState::from_str(&sync_state).unwrap_or(SyncState::Failed),
        updated_at: row.get(6)?,
        memo: row.get(7)?,
    })
}
