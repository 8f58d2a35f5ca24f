//! Channel-based live queries over the local store.
//!
//! A `LiveQuery` re-runs its query whenever the database reports a committed
//! write, so consumers see a live, restartable sequence of values instead of
//! a one-shot snapshot. Dropping and re-creating one is always safe.

use tokio::sync::watch;

use crate::error::{Error, Result};

/// A restartable, push-driven query over the local database.
pub struct LiveQuery<T> {
    changes: watch::Receiver<u64>,
    query: Box<dyn FnMut() -> Result<T> + Send>,
}

impl<T> LiveQuery<T> {
    pub(crate) fn new(
        changes: watch::Receiver<u64>,
        query: Box<dyn FnMut() -> Result<T> + Send>,
    ) -> Self {
        Self { changes, query }
    }

    /// Run the query against the current state of the store
    pub fn current(&mut self) -> Result<T> {
        (self.query)()
    }

    /// Wait for the next committed write, then return the re-queried value.
    ///
    /// Changes that arrive while the caller is away coalesce into a single
    /// wakeup; the value returned always reflects the latest state.
    pub async fn next(&mut self) -> Result<T> {
        self.changes
            .changed()
            .await
            .map_err(|_| Error::InvalidInput("database closed".to_string()))?;
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, SqliteEventStore};
    use crate::models::VoidingEvent;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn live_count(db: &Database, owner: &str) -> super::LiveQuery<i64> {
        let handle = db.clone();
        let owner = owner.to_string();
        super::LiveQuery::new(
            db.watch_changes(),
            Box::new(move || {
                handle.with_conn(|conn| SqliteEventStore::new(conn).pending_count(&owner))
            }),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn re_emits_after_each_commit() {
        let db = Database::open_in_memory().unwrap();
        let mut query = live_count(&db, "u1");
        assert_eq!(query.current().unwrap(), 0);

        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let writer = db.clone();
        let pending = query.next();
        let write = tokio::spawn(async move {
            let event = VoidingEvent::pending_create("u1", 1_000, date, None);
            writer
                .with_transaction(|tx| SqliteEventStore::new(tx).upsert(&event))
                .unwrap();
        });

        assert_eq!(pending.await.unwrap(), 1);
        write.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restartable_after_drop() {
        let db = Database::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let query = live_count(&db, "u1");
        drop(query);

        let event = VoidingEvent::pending_create("u1", 1_000, date, None);
        db.with_transaction(|tx| SqliteEventStore::new(tx).upsert(&event))
            .unwrap();

        let mut fresh = live_count(&db, "u1");
        assert_eq!(fresh.current().unwrap(), 1);
    }
}
