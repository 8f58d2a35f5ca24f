//! Sync protocol: queue drain coordination and deferred retry scheduling

mod coordinator;
mod scheduler;

pub use coordinator::SyncCoordinator;
pub use scheduler::{
    AlwaysOnline, ConnectivityProbe, DeferredSyncRunner, NoopScheduler, SyncScheduler,
};
