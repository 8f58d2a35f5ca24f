//! Shared test doubles for the sync stack.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;

use crate::auth::SessionProvider;
use crate::error::{Error, Result};
use crate::models::{EventId, Session};
use crate::remote::{RemoteApi, RemoteError, RemoteEventDto, RemoteResult};
use crate::sync::SyncScheduler;

pub(crate) fn session(user: &str, access_token: &str) -> Session {
    Session {
        user_id: user.to_string(),
        access_token: access_token.to_string(),
        refresh_token: "refresh".to_string(),
    }
}

/// Per-call script entry for [`MockApi`]
#[derive(Clone, Copy)]
pub(crate) enum Outcome {
    Ok,
    Fail { status: u16, message: &'static str },
}

/// Remote backend double: records every call as a string and pops scripted
/// outcomes in order. An exhausted script means every further call succeeds.
pub(crate) struct MockApi {
    outcomes: Mutex<VecDeque<Outcome>>,
    calls: Mutex<Vec<String>>,
    rows: Mutex<Vec<RemoteEventDto>>,
}

impl MockApi {
    pub(crate) fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            rows: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.outcomes.lock().unwrap().extend(outcomes);
    }

    pub(crate) fn set_rows(&self, rows: Vec<RemoteEventDto>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(call);
        match self.outcomes.lock().unwrap().pop_front() {
            None | Some(Outcome::Ok) => Ok(()),
            Some(Outcome::Fail { status, message }) => Err(RemoteError::Api {
                status,
                message: message.to_string(),
            }),
        }
    }
}

impl RemoteApi for MockApi {
    async fn upsert_event(&self, access_token: &str, dto: &RemoteEventDto) -> RemoteResult<()> {
        self.record(format!("create:{}:{access_token}", dto.id))
    }

    async fn soft_delete_event(
        &self,
        access_token: &str,
        id: &EventId,
        _owner_id: &str,
        _deleted_at: &str,
    ) -> RemoteResult<()> {
        self.record(format!("delete:{id}:{access_token}"))
    }

    async fn fetch_all_for_owner(
        &self,
        access_token: &str,
        owner_id: &str,
    ) -> RemoteResult<Vec<RemoteEventDto>> {
        self.record(format!("fetch:{owner_id}:{access_token}"))?;
        Ok(self.rows.lock().unwrap().clone())
    }
}

/// Session double with a scripted refresh queue.
///
/// A successful scripted refresh also replaces the current session, the way
/// a live auth client would.
pub(crate) struct ScriptedSessions {
    current: watch::Sender<Option<Session>>,
    refreshes: Mutex<VecDeque<std::result::Result<Session, String>>>,
    refresh_count: AtomicUsize,
}

impl ScriptedSessions {
    pub(crate) fn signed_in(user: &str, access_token: &str) -> Self {
        let (current, _) = watch::channel(Some(session(user, access_token)));
        Self {
            current,
            refreshes: Mutex::new(VecDeque::new()),
            refresh_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn signed_out() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current,
            refreshes: Mutex::new(VecDeque::new()),
            refresh_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push_refresh(&self, outcome: std::result::Result<Session, String>) {
        self.refreshes.lock().unwrap().push_back(outcome);
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_count.load(Ordering::SeqCst)
    }
}

impl SessionProvider for ScriptedSessions {
    async fn get_session(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    async fn refresh_session(&self) -> Result<Session> {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        match self.refreshes.lock().unwrap().pop_front() {
            Some(Ok(session)) => {
                self.current.send_replace(Some(session.clone()));
                Ok(session)
            }
            Some(Err(message)) => Err(Error::Auth(message)),
            None => Err(Error::Auth("no refresh scripted".to_string())),
        }
    }

    fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }
}

/// Scheduler double: counts deferred-sync requests
#[derive(Default)]
pub(crate) struct RecordingScheduler {
    requests: AtomicUsize,
}

impl RecordingScheduler {
    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl SyncScheduler for RecordingScheduler {
    fn request(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}
