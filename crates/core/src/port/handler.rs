// Job Handler Port
// Handlers execute a job's payload; the resolver maps job names to handlers

use crate::domain::{Job, JobPayload};
use async_trait::async_trait;
use thiserror::Error;

/// Errors a handler may report while executing a job
///
/// Any of these becomes a failed attempt on the broker side.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutionError::Failed(message.into())
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        ExecutionError::InvalidPayload(err.to_string())
    }
}

/// No handler is registered under the job's name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Job handler for {0} not found")]
pub struct HandlerNotFound(pub String);

/// Executes jobs of one name
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job; the returned value is stored by the broker as its result
    async fn handle(&self, payload: &JobPayload) -> Result<serde_json::Value, ExecutionError>;

    /// Called once when the job failed for the last time
    async fn failed(&self, _job: &Job) -> Result<(), ExecutionError> {
        Ok(())
    }
}

/// Resolves a handler instance for a delivered job
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, job: &Job) -> Result<Box<dyn JobHandler>, HandlerNotFound>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed with this value
        Succeed(serde_json::Value),
        /// Echo the payload back as the result
        Echo,
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed with this value
        Slow(u64, serde_json::Value),
    }

    /// Call counters shared between every instance a resolver hands out
    #[derive(Debug, Default, Clone)]
    pub struct CallCounts {
        handle: Arc<AtomicUsize>,
        failed: Arc<AtomicUsize>,
        failed_jobs: Arc<Mutex<Vec<Job>>>,
    }

    impl CallCounts {
        pub fn handle_calls(&self) -> usize {
            self.handle.load(Ordering::SeqCst)
        }

        pub fn failed_calls(&self) -> usize {
            self.failed.load(Ordering::SeqCst)
        }

        pub fn failed_jobs(&self) -> Vec<Job> {
            self.failed_jobs.lock().unwrap().clone()
        }
    }

    /// Mock Job Handler for testing
    pub struct MockJobHandler {
        behavior: MockBehavior,
        counts: CallCounts,
    }

    impl MockJobHandler {
        pub fn new(behavior: MockBehavior, counts: CallCounts) -> Self {
            Self { behavior, counts }
        }
    }

    #[async_trait]
    impl JobHandler for MockJobHandler {
        async fn handle(
            &self,
            payload: &JobPayload,
        ) -> Result<serde_json::Value, ExecutionError> {
            self.counts.handle.fetch_add(1, Ordering::SeqCst);

            match &self.behavior {
                MockBehavior::Succeed(value) => Ok(value.clone()),
                MockBehavior::Echo => Ok(payload.as_value().clone()),
                MockBehavior::Fail(msg) => Err(ExecutionError::failed(msg.clone())),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Slow(ms, value) => {
                    tokio::time::sleep(std::time::Duration::from_millis(*ms)).await;
                    Ok(value.clone())
                }
            }
        }

        async fn failed(&self, job: &Job) -> Result<(), ExecutionError> {
            self.counts.failed.fetch_add(1, Ordering::SeqCst);
            self.counts.failed_jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }
}
