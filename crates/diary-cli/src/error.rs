use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] diary_core::Error),
    #[error(transparent)]
    Remote(#[from] diary_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid event ID: {0}")]
    InvalidEventId(String),
    #[error("Invalid time of day (expected HH:MM): {0}")]
    InvalidTime(String),
    #[error("Could not determine a data directory; pass --db-path")]
    NoDataDir,
    #[error(
        "Sync is not configured. Set SUPABASE_URL and SUPABASE_ANON_KEY (a .env file works too)."
    )]
    NotConfigured,
}
