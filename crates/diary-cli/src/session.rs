//! File-backed session storage for the CLI.
//!
//! The session (including the refresh token) lives in a plain JSON file next
//! to the database. Refreshing goes through the Supabase token endpoint and
//! writes the rotated tokens back before anything uses them.

use std::fs;
use std::path::{Path, PathBuf};

use diary_core::auth::SessionProvider;
use diary_core::remote::SupabaseSyncApi;
use diary_core::{Error, Result, Session};
use tokio::sync::watch;

pub struct FileSessionProvider {
    path: PathBuf,
    api: SupabaseSyncApi,
    current: watch::Sender<Option<Session>>,
}

impl FileSessionProvider {
    /// Load any stored session from `path`.
    ///
    /// A missing file means signed out; a corrupt one is reported, not
    /// silently discarded, so a user does not lose a session to a bad write.
    pub fn load(path: impl Into<PathBuf>, api: SupabaseSyncApi) -> Result<Self> {
        let path = path.into();
        let session = match fs::read_to_string(&path) {
            Ok(raw) => Some(serde_json::from_str(&raw)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
            Err(error) => return Err(error.into()),
        };
        let (current, _) = watch::channel(session);
        Ok(Self { path, api, current })
    }

    /// Exchange a refresh token for a session and persist it
    pub async fn login(&self, refresh_token: &str) -> Result<Session> {
        let session = self.api.refresh_session(refresh_token).await?;
        self.persist(&session)?;
        self.current.send_replace(Some(session.clone()));
        Ok(session)
    }

    /// Delete the stored session
    pub fn logout(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        self.current.send_replace(None);
        Ok(())
    }

    fn persist(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(session)?)?;
        Ok(())
    }
}

impl SessionProvider for FileSessionProvider {
    async fn get_session(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    async fn refresh_session(&self) -> Result<Session> {
        let stored = self.current.borrow().clone().ok_or(Error::NotSignedIn)?;
        let session = self
            .api
            .refresh_session(&stored.refresh_token)
            .await
            .map_err(|error| Error::Auth(error.to_string()))?;
        self.persist(&session)?;
        self.current.send_replace(Some(session.clone()));
        Ok(session)
    }

    fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }
}

/// Default session file location, next to the database
pub fn default_session_path(data_dir: &Path) -> PathBuf {
    data_dir.join("session.json")
}
