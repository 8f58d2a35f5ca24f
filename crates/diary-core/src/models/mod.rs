//! Data models for the diary

mod event;
mod queue;
mod session;

pub use event::{EventId, SyncState, VoidingEvent};
pub use queue::{QueueId, QueueItem, SyncAction};
pub use session::Session;

/// Summary of one drain of the sync queue. Ephemeral, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Queue items applied remotely and committed locally
    pub success_count: u32,
    /// Queue items that failed and were left queued for retry
    pub fail_count: u32,
}

impl SyncReport {
    /// Whether this pass left anything behind that needs a retry
    #[must_use]
    pub const fn needs_retry(&self) -> bool {
        self.fail_count > 0
    }
}
