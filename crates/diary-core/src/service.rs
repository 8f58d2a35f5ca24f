//! High-level diary operations: local-first writes that trigger sync.
//!
//! Every mutation commits locally before any network traffic, then runs one
//! immediate sync pass. If that pass leaves failures behind (or cannot run),
//! the scheduler is asked for a deferred retry and the local result stands.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use tokio::sync::watch;

use crate::auth::SessionProvider;
use crate::db::{Database, LiveQuery, SqliteEventStore, SqliteSyncQueue};
use crate::error::{Error, Result};
use crate::models::{EventId, QueueItem, SyncAction, SyncReport, SyncState, VoidingEvent};
use crate::remote::RemoteApi;
use crate::sync::{SyncCoordinator, SyncScheduler};

pub struct DiaryService<A, S> {
    db: Database,
    coordinator: SyncCoordinator<A, S>,
    scheduler: Arc<dyn SyncScheduler>,
}

impl<A: RemoteApi, S: SessionProvider> DiaryService<A, S> {
    #[must_use]
    pub fn new(
        db: Database,
        coordinator: SyncCoordinator<A, S>,
        scheduler: Arc<dyn SyncScheduler>,
    ) -> Self {
        Self {
            db,
            coordinator,
            scheduler,
        }
    }

    /// Log an event at the current instant
    pub async fn add_now(&self, memo: Option<String>) -> Result<VoidingEvent> {
        let owner = self.owner().await?;
        let now = Local::now();
        let event =
            VoidingEvent::pending_create(owner, now.timestamp_millis(), now.date_naive(), memo);
        self.record_create(&event).await?;
        Ok(event)
    }

    /// Log an event at a chosen local wall-clock time.
    ///
    /// The stored `local_date` is the given date, even when the UTC instant
    /// falls on a neighboring day.
    pub async fn add_at(
        &self,
        date: NaiveDate,
        hour: u32,
        minute: u32,
        memo: Option<String>,
    ) -> Result<VoidingEvent> {
        if hour > 23 || minute > 59 {
            return Err(Error::InvalidInput(format!(
                "invalid time of day: {hour:02}:{minute:02}"
            )));
        }
        let owner = self.owner().await?;

        let naive = date
            .and_hms_opt(hour, minute, 0)
            .ok_or_else(|| Error::InvalidInput(format!("invalid time of day: {hour:02}:{minute:02}")))?;
        // A wall-clock time skipped by a DST jump has no instant.
        let instant = naive
            .and_local_timezone(Local)
            .earliest()
            .ok_or_else(|| Error::InvalidInput(format!("{naive} does not exist in the local zone")))?;

        let event = VoidingEvent::pending_create(owner, instant.timestamp_millis(), date, memo);
        self.record_create(&event).await?;
        Ok(event)
    }

    /// Soft-delete an event and propagate the deletion remotely.
    ///
    /// The row stays in the store flagged deleted; reads exclude it right
    /// away, regardless of sync progress.
    pub async fn delete(&self, id: &EventId) -> Result<()> {
        let mut event = self
            .db
            .with_conn(|conn| SqliteEventStore::new(conn).get_by_id(id))?
            .ok_or_else(|| Error::NotFound(id.as_str()))?;

        event.deleted = true;
        event.sync_state = SyncState::PendingDelete;
        event.updated_at = Utc::now().timestamp_millis();

        let item = QueueItem::new(event.id, SyncAction::Delete);
        self.db.with_transaction(|tx| {
            SqliteEventStore::new(tx).update(&event)?;
            SqliteSyncQueue::new(tx).enqueue(&item)
        })?;

        self.sync_now_or_schedule().await;
        Ok(())
    }

    /// Replace an event's memo and re-upload the row
    pub async fn update_memo(&self, id: &EventId, memo: Option<String>) -> Result<VoidingEvent> {
        let mut event = self
            .db
            .with_conn(|conn| SqliteEventStore::new(conn).get_by_id(id))?
            .ok_or_else(|| Error::NotFound(id.as_str()))?;
        if event.deleted {
            return Err(Error::InvalidInput(
                "cannot edit a deleted event".to_string(),
            ));
        }

        event.memo = memo;
        event.sync_state = SyncState::PendingCreate;
        event.updated_at = Utc::now().timestamp_millis();

        let item = QueueItem::new(event.id, SyncAction::Create);
        self.db.with_transaction(|tx| {
            SqliteEventStore::new(tx).update(&event)?;
            SqliteSyncQueue::new(tx).enqueue(&item)
        })?;

        self.sync_now_or_schedule().await;
        Ok(event)
    }

    /// Run one sync pass over the pending queue
    pub async fn sync_pending(&self) -> Result<SyncReport> {
        self.coordinator.drain().await
    }

    /// Pull the owner's full remote history and merge it into the store.
    ///
    /// Rows with a local pending change are skipped so an un-uploaded edit is
    /// never overwritten; malformed rows are logged and skipped. Returns the
    /// number of rows merged, then kicks off a pass for anything still
    /// pending.
    pub async fn fetch_and_sync_all(&self) -> Result<usize> {
        let Some(session) = self.coordinator.auth().get_session().await else {
            return Err(Error::NotSignedIn);
        };

        let rows = self
            .coordinator
            .api()
            .fetch_all_for_owner(&session.access_token, &session.user_id)
            .await?;

        let pending: HashSet<EventId> = self
            .db
            .with_conn(|conn| SqliteSyncQueue::new(conn).dequeue_all())?
            .into_iter()
            .map(|item| item.event_id)
            .collect();

        let mut merged = Vec::new();
        for row in rows {
            match row.into_event() {
                Ok(event) if pending.contains(&event.id) => {
                    tracing::debug!(event_id = %event.id, "Keeping local pending change over remote row");
                }
                Ok(event) => merged.push(event),
                Err(error) => tracing::warn!("Skipping malformed remote row: {error}"),
            }
        }

        let count = merged.len();
        self.db
            .with_transaction(|tx| SqliteEventStore::new(tx).upsert_many(&merged))?;

        self.sync_now_or_schedule().await;
        Ok(count)
    }

    pub async fn events_for_date(&self, date: NaiveDate) -> Result<Vec<VoidingEvent>> {
        let owner = self.owner().await?;
        self.db
            .with_conn(|conn| SqliteEventStore::new(conn).list_by_owner_and_date(&owner, date))
    }

    pub async fn daily_count(&self, date: NaiveDate) -> Result<i64> {
        let owner = self.owner().await?;
        self.db
            .with_conn(|conn| SqliteEventStore::new(conn).daily_count(&owner, date))
    }

    /// Per-day counts for one `YYYY-MM` month
    pub async fn monthly_counts(&self, year_month: &str) -> Result<BTreeMap<NaiveDate, i64>> {
        let owner = self.owner().await?;
        self.db
            .with_conn(|conn| SqliteEventStore::new(conn).monthly_counts(&owner, year_month))
    }

    pub async fn pending_count(&self) -> Result<i64> {
        let owner = self.owner().await?;
        self.db
            .with_conn(|conn| SqliteEventStore::new(conn).pending_count(&owner))
    }

    /// Most recent recorded sync error among this owner's queued items
    pub async fn last_pending_error(&self) -> Result<Option<String>> {
        let owner = self.owner().await?;
        self.db
            .with_conn(|conn| SqliteSyncQueue::new(conn).last_pending_error(&owner))
    }

    /// Live list of one day's events, re-emitted after every committed write
    pub async fn observe_events_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<LiveQuery<Vec<VoidingEvent>>> {
        let owner = self.owner().await?;
        let db = self.db.clone();
        Ok(LiveQuery::new(
            self.db.watch_changes(),
            Box::new(move || {
                db.with_conn(|conn| SqliteEventStore::new(conn).list_by_owner_and_date(&owner, date))
            }),
        ))
    }

    pub async fn observe_daily_count(&self, date: NaiveDate) -> Result<LiveQuery<i64>> {
        let owner = self.owner().await?;
        let db = self.db.clone();
        Ok(LiveQuery::new(
            self.db.watch_changes(),
            Box::new(move || db.with_conn(|conn| SqliteEventStore::new(conn).daily_count(&owner, date))),
        ))
    }

    pub async fn observe_monthly_counts(
        &self,
        year_month: &str,
    ) -> Result<LiveQuery<BTreeMap<NaiveDate, i64>>> {
        let owner = self.owner().await?;
        let db = self.db.clone();
        let year_month = year_month.to_string();
        Ok(LiveQuery::new(
            self.db.watch_changes(),
            Box::new(move || {
                db.with_conn(|conn| SqliteEventStore::new(conn).monthly_counts(&owner, &year_month))
            }),
        ))
    }

    pub async fn observe_pending_count(&self) -> Result<LiveQuery<i64>> {
        let owner = self.owner().await?;
        let db = self.db.clone();
        Ok(LiveQuery::new(
            self.db.watch_changes(),
            Box::new(move || db.with_conn(|conn| SqliteEventStore::new(conn).pending_count(&owner))),
        ))
    }

    pub async fn observe_last_pending_error(&self) -> Result<LiveQuery<Option<String>>> {
        let owner = self.owner().await?;
        let db = self.db.clone();
        Ok(LiveQuery::new(
            self.db.watch_changes(),
            Box::new(move || {
                db.with_conn(|conn| SqliteSyncQueue::new(conn).last_pending_error(&owner))
            }),
        ))
    }

    /// True while a sync pass is running
    #[must_use]
    pub fn observe_sync_in_progress(&self) -> watch::Receiver<bool> {
        self.coordinator.watch_sync_in_progress()
    }

    async fn owner(&self) -> Result<String> {
        self.coordinator
            .auth()
            .get_session()
            .await
            .map(|session| session.user_id)
            .ok_or(Error::NotSignedIn)
    }

    /// Commit the event plus its queue item atomically, then try to sync
    async fn record_create(&self, event: &VoidingEvent) -> Result<()> {
        let item = QueueItem::new(event.id, SyncAction::Create);
        self.db.with_transaction(|tx| {
            SqliteEventStore::new(tx).upsert(event)?;
            SqliteSyncQueue::new(tx).enqueue(&item)
        })?;

        self.sync_now_or_schedule().await;
        Ok(())
    }

    /// One immediate pass; any leftover work is handed to the scheduler.
    /// Sync failure never fails the local operation that triggered it.
    async fn sync_now_or_schedule(&self) {
        match self.coordinator.drain().await {
            Ok(report) if !report.needs_retry() => {}
            Ok(report) => {
                tracing::debug!(failed = report.fail_count, "Deferring retry of failed items");
                self.scheduler.request();
            }
            Err(error) => {
                tracing::warn!("Sync pass could not run: {error}");
                self.scheduler.request();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteEventDto;
    use crate::testing::{MockApi, Outcome, RecordingScheduler, ScriptedSessions};
    use pretty_assertions::assert_eq;

    struct Harness {
        db: Database,
        api: Arc<MockApi>,
        scheduler: Arc<RecordingScheduler>,
        service: DiaryService<MockApi, ScriptedSessions>,
    }

    fn harness(auth: ScriptedSessions) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let api = Arc::new(MockApi::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let coordinator = SyncCoordinator::new(db.clone(), Arc::clone(&api), Arc::new(auth));
        let service = DiaryService::new(db.clone(), coordinator, scheduler.clone() as Arc<dyn SyncScheduler>);
        Harness {
            db,
            api,
            scheduler,
            service,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn state_of(db: &Database, id: &EventId) -> SyncState {
        db.with_conn(|conn| SqliteEventStore::new(conn).get_by_id(id))
            .unwrap()
            .unwrap()
            .sync_state
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_requires_a_session() {
        let h = harness(ScriptedSessions::signed_out());
        assert!(matches!(
            h.service.add_now(None).await,
            Err(Error::NotSignedIn)
        ));
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_at_validates_the_time_of_day() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        let day = date(2024, 3, 1);
        assert!(matches!(
            h.service.add_at(day, 24, 0, None).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            h.service.add_at(day, 10, 60, None).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(h.service.daily_count(day).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_syncs_immediately_when_the_backend_is_up() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        let day = date(2024, 3, 1);

        let event = h
            .service
            .add_at(day, 9, 30, Some("note".to_string()))
            .await
            .unwrap();

        assert_eq!(event.local_date, day);
        assert_eq!(state_of(&h.db, &event.id), SyncState::Synced);
        assert_eq!(h.service.pending_count().await.unwrap(), 0);
        assert_eq!(h.scheduler.requests(), 0);
        assert_eq!(h.api.calls(), vec![format!("create:{}:tok", event.id)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_succeeds_locally_and_schedules_retry_when_remote_fails() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        let day = date(2024, 3, 1);
        h.api.script([Outcome::Fail {
            status: 500,
            message: "down",
        }]);

        let event = h.service.add_at(day, 9, 30, None).await.unwrap();

        // The write is already readable despite the failed upload
        let listed = h.service.events_for_date(day).await.unwrap();
        assert_eq!(listed, vec![event.clone()]);
        assert_eq!(state_of(&h.db, &event.id), SyncState::PendingCreate);
        assert_eq!(h.service.pending_count().await.unwrap(), 1);
        assert_eq!(h.scheduler.requests(), 1);
        assert!(h
            .service
            .last_pending_error()
            .await
            .unwrap()
            .unwrap()
            .contains("down"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_hides_the_event_and_propagates_remotely() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        let day = date(2024, 3, 1);
        let event = h.service.add_at(day, 9, 30, None).await.unwrap();

        h.service.delete(&event.id).await.unwrap();

        assert!(h.service.events_for_date(day).await.unwrap().is_empty());
        assert_eq!(state_of(&h.db, &event.id), SyncState::Synced);
        assert_eq!(
            h.api.calls(),
            vec![
                format!("create:{}:tok", event.id),
                format!("delete:{}:tok", event.id),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_unknown_id_is_not_found() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        assert!(matches!(
            h.service.delete(&EventId::new()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_works_offline_and_defers_the_upload() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        let day = date(2024, 3, 1);
        let event = h.service.add_at(day, 9, 30, None).await.unwrap();

        h.api.script([Outcome::Fail {
            status: 500,
            message: "down",
        }]);
        h.service.delete(&event.id).await.unwrap();

        assert!(h.service.events_for_date(day).await.unwrap().is_empty());
        assert_eq!(state_of(&h.db, &event.id), SyncState::PendingDelete);
        assert_eq!(h.scheduler.requests(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_memo_reuploads_the_row() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        let day = date(2024, 3, 1);
        let event = h.service.add_at(day, 9, 30, None).await.unwrap();

        let updated = h
            .service
            .update_memo(&event.id, Some("later note".to_string()))
            .await
            .unwrap();

        assert_eq!(updated.memo.as_deref(), Some("later note"));
        assert_eq!(state_of(&h.db, &event.id), SyncState::Synced);
        assert_eq!(
            h.api.calls(),
            vec![
                format!("create:{}:tok", event.id),
                format!("create:{}:tok", event.id),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_memo_rejects_deleted_events() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        let event = h.service.add_at(date(2024, 3, 1), 9, 30, None).await.unwrap();
        h.service.delete(&event.id).await.unwrap();

        assert!(matches!(
            h.service.update_memo(&event.id, None).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_requires_a_session() {
        let h = harness(ScriptedSessions::signed_out());
        assert!(matches!(
            h.service.fetch_and_sync_all().await,
            Err(Error::NotSignedIn)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_merges_remote_rows_but_pending_changes_win() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        let day = date(2024, 3, 1);

        // This create stays pending: the immediate pass fails, and so does
        // the pass fetch_and_sync_all runs afterwards.
        h.api.script([
            Outcome::Fail {
                status: 500,
                message: "down",
            },
            Outcome::Ok, // the fetch itself
            Outcome::Fail {
                status: 500,
                message: "still down",
            },
        ]);
        let local = h
            .service
            .add_at(day, 9, 30, Some("local edit".to_string()))
            .await
            .unwrap();

        let remote_new = VoidingEvent::pending_create("u1", 1_709_283_600_000, day, None);
        let stale_copy_of_local = RemoteEventDto {
            memo: Some("stale remote memo".to_string()),
            ..RemoteEventDto::from_event(&local).unwrap()
        };
        h.api.set_rows(vec![
            stale_copy_of_local,
            RemoteEventDto::from_event(&remote_new).unwrap(),
            RemoteEventDto {
                id: "not-a-uuid".to_string(),
                ..RemoteEventDto::from_event(&remote_new).unwrap()
            },
        ]);

        let merged = h.service.fetch_and_sync_all().await.unwrap();

        assert_eq!(merged, 1);
        let kept = h
            .db
            .with_conn(|conn| SqliteEventStore::new(conn).get_by_id(&local.id))
            .unwrap()
            .unwrap();
        assert_eq!(kept.memo.as_deref(), Some("local edit"));
        assert_eq!(kept.sync_state, SyncState::PendingCreate);
        assert_eq!(state_of(&h.db, &remote_new.id), SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reads_are_scoped_to_the_signed_in_owner() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        let day = date(2024, 3, 1);
        let foreign = VoidingEvent::pending_create("u2", 1_709_283_600_000, day, None);
        h.db
            .with_transaction(|tx| SqliteEventStore::new(tx).upsert(&foreign))
            .unwrap();

        assert!(h.service.events_for_date(day).await.unwrap().is_empty());
        assert_eq!(h.service.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn observed_day_list_updates_after_writes() {
        let h = harness(ScriptedSessions::signed_in("u1", "tok"));
        let day = date(2024, 3, 1);
        let mut live = h.service.observe_events_for_date(day).await.unwrap();
        assert!(live.current().unwrap().is_empty());

        let event = h.service.add_at(day, 9, 30, None).await.unwrap();
        assert_eq!(live.current().unwrap(), h.service.events_for_date(day).await.unwrap());
        assert_eq!(live.current().unwrap()[0].id, event.id);
    }
}
