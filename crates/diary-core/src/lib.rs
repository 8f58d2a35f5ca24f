//! diary-core - Core library for the voiding diary
//!
//! Offline-first event store with a write-ahead sync queue. All writes land
//! in local SQLite first; a coordinator drains the queue against the remote
//! backend whenever a session and connectivity allow.

pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod service;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use models::{EventId, Session, SyncReport, SyncState, VoidingEvent};
pub use service::DiaryService;
