//! Voiding event model

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a voiding event, using UUID v7 (time-sortable).
///
/// Client-generated and immutable; the same value is sent to the remote side
/// as both primary key and conflict key, so re-sends of the same create are
/// merged instead of duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a new unique event ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Synchronization state of a locally stored event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Created locally, not yet uploaded
    PendingCreate,
    /// Soft-deleted locally, deletion not yet uploaded
    PendingDelete,
    /// Confirmed on the remote side
    Synced,
    /// Exhausted the retry budget; still queued, flagged to the user
    Failed,
}

impl SyncState {
    /// Database/wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingCreate => "PENDING_CREATE",
            Self::PendingDelete => "PENDING_DELETE",
            Self::Synced => "SYNCED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether this state counts toward the pending-sync badge
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::PendingCreate | Self::PendingDelete)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_CREATE" => Ok(Self::PendingCreate),
            "PENDING_DELETE" => Ok(Self::PendingDelete),
            "SYNCED" => Ok(Self::Synced),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown sync state: {other}")),
        }
    }
}

/// One logged voiding occurrence.
///
/// Rows are soft-deleted only; history is never physically removed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidingEvent {
    /// Client-generated identity, stable across local and remote copies
    pub id: EventId,
    /// Authenticated user the event belongs to
    pub owner_id: String,
    /// Instant the event represents (Unix ms)
    pub occurred_at: i64,
    /// Calendar date derived from `occurred_at` in the device zone at
    /// creation time. Denormalized for date-range queries; deliberately not
    /// recomputed if the zone changes later.
    pub local_date: NaiveDate,
    /// Soft-delete flag
    pub deleted: bool,
    /// Sync lifecycle state
    pub sync_state: SyncState,
    /// Last local mutation to this row (Unix ms); doubles as the delete
    /// timestamp sent remotely
    pub updated_at: i64,
    /// Optional free-text memo
    pub memo: Option<String>,
}

impl VoidingEvent {
    /// Create a new locally pending event
    #[must_use]
    pub fn pending_create(
        owner_id: impl Into<String>,
        occurred_at: i64,
        local_date: NaiveDate,
        memo: Option<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            owner_id: owner_id.into(),
            occurred_at,
            local_date,
            deleted: false,
            sync_state: SyncState::PendingCreate,
            updated_at: chrono::Utc::now().timestamp_millis(),
            memo,
        }
    }
}
