// Port Layer - Interfaces for external dependencies

pub mod broker;
pub mod handler;
pub mod id_provider; // For deterministic testing
pub mod time_provider;

// Re-exports
pub use broker::{
    Broker, EventStream, JobProcessor, JobRef, OpenStreamGuard, QueueHandle, WorkerRef,
};
pub use handler::{ExecutionError, HandlerNotFound, HandlerResolver, JobHandler};
pub use id_provider::IdProvider;
pub use time_provider::TimeProvider;
