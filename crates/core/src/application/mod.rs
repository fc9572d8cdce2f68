// Application Layer - Queue orchestration use cases

pub mod admin;
pub mod dispatcher;
pub mod failure;
pub mod handlers;
pub mod manager;
pub mod registry;
pub mod waiter;
pub mod worker;

// Re-exports
pub use admin::QueueAdmin;
pub use dispatcher::Dispatcher;
pub use failure::{FailureOutcome, FailureReporter};
pub use handlers::HandlerRegistry;
pub use manager::QueueManager;
pub use registry::QueueRegistry;
pub use waiter::CompletionWaiter;
pub use worker::{
    shutdown_all, shutdown_channel, HandlerDispatch, RunningWorker, ShutdownSender, ShutdownToken,
    WorkerRunner,
};
