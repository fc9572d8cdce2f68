// Domain Layer - Jobs, queues, options and events

pub mod error;
pub mod event;
pub mod job;
pub mod options;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use event::{JobFailure, QueueEvent};
pub use job::{Job, JobId, JobName, JobPayload, JobState};
pub use options::{Backoff, BackoffKind, DispatchOptions, JobOptions, MAX_DELAY_MS, MAX_PRIORITY};
pub use queue::{
    queue_or_default, validate_queue_name, JobCounts, QueueId, DEFAULT_QUEUE, MAX_QUEUE_NAME_LEN,
};
