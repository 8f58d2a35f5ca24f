//! Auth collaborator seam.
//!
//! The sync engine never persists or mutates credentials; it reads the
//! current session and, when the backend reports an expired token, asks for
//! a refresh. Hosts plug in their own provider (secure storage, OAuth flow);
//! the engine only depends on this trait.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::models::Session;

/// Source of the current authenticated session.
pub trait SessionProvider: Send + Sync + 'static {
    /// Current session, if any
    fn get_session(&self) -> impl Future<Output = Option<Session>> + Send;

    /// Exchange the refresh token for fresh credentials
    fn refresh_session(&self) -> impl Future<Output = Result<Session>> + Send;

    /// Live view of the session (None while signed out)
    fn watch_session(&self) -> watch::Receiver<Option<Session>>;
}

/// Provider holding a fixed session, for tests and single-shot tools.
///
/// Refreshing re-returns the same session; hosts that can actually refresh
/// implement [`SessionProvider`] themselves.
#[derive(Clone)]
pub struct StaticSessionProvider {
    session: Arc<watch::Sender<Option<Session>>>,
}

impl StaticSessionProvider {
    #[must_use]
    pub fn new(session: Option<Session>) -> Self {
        let (tx, _) = watch::channel(session);
        Self {
            session: Arc::new(tx),
        }
    }

    /// Replace the held session (e.g. after an external sign-in)
    pub fn set_session(&self, session: Option<Session>) {
        self.session.send_replace(session);
    }
}

impl SessionProvider for StaticSessionProvider {
    async fn get_session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    async fn refresh_session(&self) -> Result<Session> {
        self.session
            .borrow()
            .clone()
            .ok_or(Error::NotSignedIn)
    }

    fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}
