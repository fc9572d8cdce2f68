// Conveyor Infrastructure - SQLite Adapter
// Implements: Broker, QueueHandle, EventStream (conveyor-core ports)

mod broker;
mod connection;
mod error;
mod events;
mod migration;
mod queue;
mod store;
mod worker;

pub use broker::{SqliteBroker, DEFAULT_EVENT_POLL_INTERVAL};
pub use connection::create_pool;
pub use events::SqliteEventStream;
pub use migration::run_migrations;
pub use queue::SqliteQueue;
pub use store::STALLED_REASON;
