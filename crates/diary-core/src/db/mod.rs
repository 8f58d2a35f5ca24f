//! Local database layer: connection, migrations, repositories, live queries

mod connection;
mod event_store;
mod live;
mod migrations;
mod sync_queue;

pub use connection::Database;
pub use event_store::SqliteEventStore;
pub use live::LiveQuery;
pub use sync_queue::SqliteSyncQueue;
