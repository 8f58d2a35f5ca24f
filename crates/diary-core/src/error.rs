//! Error types for diary-core

use thiserror::Error;

/// Result type alias using diary-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in diary-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input, rejected before any store mutation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation requires an authenticated session
    #[error("Not signed in")]
    NotSignedIn,

    /// Session refresh or other auth collaborator failure
    #[error("Auth error: {0}")]
    Auth(String),

    /// Remote backend failure
    #[error("Remote error: {0}")]
    Remote(#[from] crate::remote::RemoteError),
}
