//! Sync queue repository

use std::str::FromStr;

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{QueueId, QueueItem, SyncAction};

/// `SQLite` repository for pending remote operations
pub struct SqliteSyncQueue<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncQueue<'a> {
    #[must_use]
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Idempotent upsert by queue id
    pub fn enqueue(&self, item: &QueueItem) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_queue
             (queue_id, event_id, action, retry_count, last_error)
             VALUES (?, ?, ?, ?, ?)",
            params![
                item.queue_id.as_str(),
                item.event_id.as_str(),
                item.action.as_str(),
                item.retry_count,
                item.last_error,
            ],
        )?;
        Ok(())
    }

    /// Persist an incremented retry count and the error that caused it
    pub fn update_retry(&self, item: &QueueItem) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET retry_count = ?, last_error = ? WHERE queue_id = ?",
            params![item.retry_count, item.last_error, item.queue_id.as_str()],
        )?;
        Ok(())
    }

    /// Snapshot of all pending items, fewest failures first.
    ///
    /// Ascending retry order gives fresh items priority over chronically
    /// failing ones, so one poison item cannot starve the rest.
    pub fn dequeue_all(&self) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT queue_id, event_id, action, retry_count, last_error
             FROM sync_queue ORDER BY retry_count ASC",
        )?;

        let items = stmt
            .query_map([], parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    pub fn remove(&self, queue_id: &QueueId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sync_queue WHERE queue_id = ?",
            params![queue_id.as_str()],
        )?;
        Ok(())
    }

    /// Most recent error among pending items for this owner's events, for UI
    /// surfacing only. Highest retry count wins the tie.
    pub fn last_pending_error(&self, owner_id: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT q.last_error FROM sync_queue q
             JOIN voiding_events e ON e.id = q.event_id
             WHERE e.owner_id = ? AND q.last_error IS NOT NULL
             ORDER BY q.retry_count DESC
             LIMIT 1",
            params![owner_id],
            |row| row.get(0),
        );

        match result {
            Ok(error) => Ok(Some(error)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let queue_id: String = row.get(0)?;
    let event_id: String = row.get(1)?;
    let action: String = row.get(2)?;
    Ok(QueueItem {
        queue_id: queue_id.parse().map_err(|e: uuid::Error| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        event_id: event_id.parse().map_err(|e: uuid::Error| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        action: SyncAction::from_str(&action).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        retry_count: row.get(3)?,
        last_error: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SqliteEventStore};
    use crate::models::VoidingEvent;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn stored_event(db: &Database, owner: &str) -> VoidingEvent {
        let event = VoidingEvent::pending_create(
            owner,
            1_000,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            None,
        );
        db.with_transaction(|tx| SqliteEventStore::new(tx).upsert(&event))
            .unwrap();
        event
    }

    #[test]
    fn enqueue_is_idempotent_by_queue_id() {
        let db = setup();
        let event = stored_event(&db, "u1");
        let item = QueueItem::new(event.id, SyncAction::Create);

        db.with_transaction(|tx| {
            let queue = SqliteSyncQueue::new(tx);
            queue.enqueue(&item)?;
            queue.enqueue(&item)
        })
        .unwrap();

        let all = db
            .with_conn(|conn| SqliteSyncQueue::new(conn).dequeue_all())
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], item);
    }

    #[test]
    fn dequeue_orders_by_retry_count_ascending() {
        let db = setup();
        let event = stored_event(&db, "u1");

        let mut tired = QueueItem::new(event.id, SyncAction::Create);
        tired.retry_count = 3;
        let fresh = QueueItem::new(event.id, SyncAction::Delete);

        db.with_transaction(|tx| {
            let queue = SqliteSyncQueue::new(tx);
            queue.enqueue(&tired)?;
            queue.enqueue(&fresh)
        })
        .unwrap();

        let all = db
            .with_conn(|conn| SqliteSyncQueue::new(conn).dequeue_all())
            .unwrap();
        assert_eq!(all[0], fresh);
        assert_eq!(all[1], tired);
    }

    #[test]
    fn update_retry_persists_count_and_error() {
        let db = setup();
        let event = stored_event(&db, "u1");
        let mut item = QueueItem::new(event.id, SyncAction::Create);

        db.with_transaction(|tx| SqliteSyncQueue::new(tx).enqueue(&item))
            .unwrap();

        item.retry_count = 1;
        item.last_error = Some("HTTP 500".to_string());
        db.with_transaction(|tx| SqliteSyncQueue::new(tx).update_retry(&item))
            .unwrap();

        let all = db
            .with_conn(|conn| SqliteSyncQueue::new(conn).dequeue_all())
            .unwrap();
        assert_eq!(all[0].retry_count, 1);
        assert_eq!(all[0].last_error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn remove_deletes_item() {
        let db = setup();
        let event = stored_event(&db, "u1");
        let item = QueueItem::new(event.id, SyncAction::Create);

        db.with_transaction(|tx| SqliteSyncQueue::new(tx).enqueue(&item))
            .unwrap();
        db.with_transaction(|tx| SqliteSyncQueue::new(tx).remove(&item.queue_id))
            .unwrap();

        let all = db
            .with_conn(|conn| SqliteSyncQueue::new(conn).dequeue_all())
            .unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn last_pending_error_scoped_to_owner_highest_retry_wins() {
        let db = setup();
        let mine = stored_event(&db, "u1");
        let theirs = stored_event(&db, "u2");

        let mut soft = QueueItem::new(mine.id, SyncAction::Create);
        soft.retry_count = 1;
        soft.last_error = Some("HTTP 500".to_string());
        let mut hard = QueueItem::new(mine.id, SyncAction::Delete);
        hard.retry_count = 4;
        hard.last_error = Some("HTTP 503".to_string());
        let mut other = QueueItem::new(theirs.id, SyncAction::Create);
        other.retry_count = 9;
        other.last_error = Some("not mine".to_string());

        db.with_transaction(|tx| {
            let queue = SqliteSyncQueue::new(tx);
            queue.enqueue(&soft)?;
            queue.enqueue(&hard)?;
            queue.enqueue(&other)
        })
        .unwrap();

        let error = db
            .with_conn(|conn| SqliteSyncQueue::new(conn).last_pending_error("u1"))
            .unwrap();
        assert_eq!(error.as_deref(), Some("HTTP 503"));

        let none = db
            .with_conn(|conn| SqliteSyncQueue::new(conn).last_pending_error("u3"))
            .unwrap();
        assert_eq!(none, None);
    }
}
