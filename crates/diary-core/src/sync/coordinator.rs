//! Sync coordinator: drains the pending queue against the remote backend.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::auth::SessionProvider;
use crate::db::{Database, SqliteEventStore, SqliteSyncQueue};
use crate::error::Result;
use crate::models::{QueueItem, SyncAction, SyncReport, SyncState, VoidingEvent};
use crate::remote::{iso_from_millis, RemoteApi, RemoteEventDto, RemoteResult};

/// After this many cumulative failures the event is flagged `Failed`.
/// The queue item stays and keeps being retried; the flag only surfaces the
/// stuck state to the user.
const MAX_ATTEMPTS: i64 = 5;

/// Drives one full pass over the sync queue per [`drain`](Self::drain) call.
///
/// Cloneable; clones share the same busy signal, so overlapping drains from
/// a foreground trigger and a background job report one coherent
/// "sync in progress" stream.
pub struct SyncCoordinator<A, S> {
    db: Database,
    api: Arc<A>,
    auth: Arc<S>,
    activity: SyncActivity,
}

impl<A, S> Clone for SyncCoordinator<A, S> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            api: Arc::clone(&self.api),
            auth: Arc::clone(&self.auth),
            activity: self.activity.clone(),
        }
    }
}

impl<A: RemoteApi, S: SessionProvider> SyncCoordinator<A, S> {
    #[must_use]
    pub fn new(db: Database, api: Arc<A>, auth: Arc<S>) -> Self {
        Self {
            db,
            api,
            auth,
            activity: SyncActivity::new(),
        }
    }

    pub(crate) fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub(crate) fn auth(&self) -> &Arc<S> {
        &self.auth
    }

    /// Live boolean stream: true while at least one drain is running
    #[must_use]
    pub fn watch_sync_in_progress(&self) -> watch::Receiver<bool> {
        self.activity.subscribe()
    }

    /// Apply every pending queue item remotely, once.
    ///
    /// Without a session this is a no-op reporting zero, not a failure.
    /// The queue is snapshotted up front; items enqueued during the pass are
    /// picked up by the next invocation. Individual item failures are
    /// recorded and counted but never abort the pass; only a local store
    /// error propagates.
    pub async fn drain(&self) -> Result<SyncReport> {
        let _busy = self.activity.enter();

        let Some(session) = self.auth.get_session().await else {
            tracing::debug!("Skipping sync: not signed in");
            return Ok(SyncReport::default());
        };

        let queue = self
            .db
            .with_conn(|conn| SqliteSyncQueue::new(conn).dequeue_all())?;
        if queue.is_empty() {
            return Ok(SyncReport::default());
        }

        // A token refreshed for one item is reused for the rest of the pass.
        let mut access_token = session.access_token;
        let mut report = SyncReport::default();

        for item in queue {
            let event = self
                .db
                .with_conn(|conn| SqliteEventStore::new(conn).get_by_id(&item.event_id))?;
            let Some(event) = event else {
                tracing::warn!(queue_id = %item.queue_id, "Removing orphaned queue item");
                self.db
                    .with_transaction(|tx| SqliteSyncQueue::new(tx).remove(&item.queue_id))?;
                continue;
            };

            match self.attempt(&item, &event, &mut access_token).await {
                Ok(()) => {
                    self.db.with_transaction(|tx| {
                        let mut synced = event.clone();
                        synced.sync_state = SyncState::Synced;
                        SqliteEventStore::new(tx).update(&synced)?;
                        SqliteSyncQueue::new(tx).remove(&item.queue_id)
                    })?;
                    report.success_count += 1;
                }
                Err(message) => {
                    tracing::warn!(
                        event_id = %item.event_id,
                        action = %item.action,
                        retry = item.retry_count + 1,
                        "Sync attempt failed: {message}"
                    );
                    self.db.with_transaction(|tx| {
                        let mut retried = item.clone();
                        retried.retry_count += 1;
                        retried.last_error = Some(message);
                        SqliteSyncQueue::new(tx).update_retry(&retried)?;

                        if retried.retry_count >= MAX_ATTEMPTS {
                            let mut failed = event.clone();
                            failed.sync_state = SyncState::Failed;
                            SqliteEventStore::new(tx).update(&failed)?;
                        }
                        Ok(())
                    })?;
                    report.fail_count += 1;
                }
            }
        }

        tracing::debug!(
            success = report.success_count,
            failed = report.fail_count,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// One attempt for one item: on auth expiry, refresh at most once and
    /// retry once with the new token. A failed refresh degrades to a plain
    /// recorded failure; the next item keeps the stale token.
    async fn attempt(
        &self,
        item: &QueueItem,
        event: &VoidingEvent,
        access_token: &mut String,
    ) -> std::result::Result<(), String> {
        let Err(error) = self.apply(item, event, access_token).await else {
            return Ok(());
        };
        if !error.is_auth_expired() {
            return Err(error.to_string());
        }

        let refreshed = match self.auth.refresh_session().await {
            Ok(session) => session,
            Err(refresh_error) => return Err(refresh_error.to_string()),
        };
        *access_token = refreshed.access_token;

        self.apply(item, event, access_token)
            .await
            .map_err(|retry_error| retry_error.to_string())
    }

    async fn apply(
        &self,
        item: &QueueItem,
        event: &VoidingEvent,
        access_token: &str,
    ) -> RemoteResult<()> {
        match item.action {
            SyncAction::Create => {
                self.api
                    .upsert_event(access_token, &RemoteEventDto::from_event(event)?)
                    .await
            }
            SyncAction::Delete => {
                self.api
                    .soft_delete_event(
                        access_token,
                        &event.id,
                        &event.owner_id,
                        &iso_from_millis(event.updated_at)?,
                    )
                    .await
            }
        }
    }
}

/// Shared busy counter behind the "sync in progress" stream.
///
/// The guard decrements on drop, so an early return or propagated error can
/// never leave the signal stuck on. The count is clamped at zero.
#[derive(Clone)]
struct SyncActivity {
    inner: Arc<ActivityInner>,
}

struct ActivityInner {
    count: Mutex<usize>,
    busy: watch::Sender<bool>,
}

impl SyncActivity {
    fn new() -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(ActivityInner {
                count: Mutex::new(0),
                busy,
            }),
        }
    }

    fn enter(&self) -> BusyGuard {
        let mut count = self
            .inner
            .count
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *count += 1;
        if *count == 1 {
            self.inner.busy.send_replace(true);
        }
        BusyGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.busy.subscribe()
    }
}

struct BusyGuard {
    inner: Arc<ActivityInner>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut count = self
            .inner
            .count
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.inner.busy.send_replace(false);
        }
    }
}
