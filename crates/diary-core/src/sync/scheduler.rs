//! Deferred sync scheduling.
//!
//! A scheduler's only contract with the core is "eventually call drain()
//! again". Requests coalesce: a burst of local mutations while a retry loop
//! is already pending produces one job, not a pile of concurrent ones.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::auth::SessionProvider;
use crate::remote::RemoteApi;
use crate::sync::SyncCoordinator;

/// First retry delay; doubles after every failing pass
const BASE_BACKOFF: Duration = Duration::from_secs(10);
/// Backoff ceiling
const MAX_BACKOFF: Duration = Duration::from_secs(30 * 60);
/// How often to re-check connectivity while offline
const OFFLINE_POLL: Duration = Duration::from_secs(30);

/// Fire-and-forget request for a deferred sync
pub trait SyncScheduler: Send + Sync + 'static {
    fn request(&self);
}

/// Scheduler for hosts without background work (one-shot tools, tests)
pub struct NoopScheduler;

impl SyncScheduler for NoopScheduler {
    fn request(&self) {
        tracing::debug!("Deferred sync requested but no background runner is attached");
    }
}

/// Network reachability gate for the background runner
pub trait ConnectivityProbe: Send + Sync + 'static {
    fn is_online(&self) -> impl Future<Output = bool> + Send;
}

/// Probe for environments where connectivity is assumed (desktop, tests)
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

/// Background task that re-runs `drain()` with exponential backoff until a
/// pass reports zero failures.
///
/// `request()` stores at most one wakeup permit, so duplicate requests fold
/// into the pending run. The task is aborted when the runner drops.
pub struct DeferredSyncRunner {
    notify: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl DeferredSyncRunner {
    #[must_use]
    pub fn spawn<A, S, P>(coordinator: SyncCoordinator<A, S>, probe: P) -> Self
    where
        A: RemoteApi,
        S: SessionProvider,
        P: ConnectivityProbe,
    {
        Self::spawn_with_backoff(coordinator, probe, BASE_BACKOFF)
    }

    /// Like [`spawn`](Self::spawn) with a custom base backoff (tests use
    /// millisecond delays)
    #[must_use]
    pub fn spawn_with_backoff<A, S, P>(
        coordinator: SyncCoordinator<A, S>,
        probe: P,
        base_backoff: Duration,
    ) -> Self
    where
        A: RemoteApi,
        S: SessionProvider,
        P: ConnectivityProbe,
    {
        let notify = Arc::new(Notify::new());
        let waiter = Arc::clone(&notify);

        let handle = tokio::spawn(async move {
            loop {
                waiter.notified().await;
                let mut backoff = base_backoff;

                loop {
                    while !probe.is_online().await {
                        tokio::time::sleep(OFFLINE_POLL.min(base_backoff)).await;
                    }

                    match coordinator.drain().await {
                        Ok(report) if !report.needs_retry() => break,
                        Ok(report) => {
                            tracing::debug!(
                                failed = report.fail_count,
                                "Deferred sync left failures, backing off {backoff:?}"
                            );
                        }
                        Err(error) => {
                            tracing::warn!("Deferred sync pass failed: {error}");
                        }
                    }

                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        });

        Self { notify, handle }
    }
}

impl SyncScheduler for DeferredSyncRunner {
    fn request(&self) {
        self.notify.notify_one();
    }
}

impl Drop for DeferredSyncRunner {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
