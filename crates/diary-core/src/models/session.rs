//! Authenticated session model

use std::fmt;

use serde::{Deserialize, Serialize};

/// Credentials presented to the remote backend on every request.
///
/// Owned by the auth collaborator; the sync engine only reads it and, on an
/// auth-expiry failure, asks for it to be refreshed. It never persists or
/// mutates the session itself.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}
