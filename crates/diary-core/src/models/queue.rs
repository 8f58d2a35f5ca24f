//! Sync queue item model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EventId;

/// A unique identifier for a queue item, independent of the event id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(Uuid);

impl QueueId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Remote operation a queue item represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncAction {
    Create,
    Delete,
}

impl SyncAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unknown sync action: {other}")),
        }
    }
}

/// One durable unit of pending remote work derived from a local mutation.
///
/// Created in the same transaction as the event mutation it represents and
/// removed when the remote operation succeeds. `action` and `event_id` are
/// never changed after creation; only `retry_count`/`last_error` move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub queue_id: QueueId,
    pub event_id: EventId,
    pub action: SyncAction,
    pub retry_count: i64,
    pub last_error: Option<String>,
}

impl QueueItem {
    /// New pending item for the given event and action
    #[must_use]
    pub fn new(event_id: EventId, action: SyncAction) -> Self {
        Self {
            queue_id: QueueId::new(),
            event_id,
            action,
            retry_count: 0,
            last_error: None,
        }
    }
}
