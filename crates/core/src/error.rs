// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Broker rejected an enqueue (or the job failed validation before it)
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Handler error: {0}")]
    HandlerNotFound(#[from] crate::port::HandlerNotFound),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::port::ExecutionError),

    /// Deadline passed before the awaited job finished
    #[error("Timed out after {timeout_ms}ms waiting for job {job_id}")]
    WaitTimeout { job_id: String, timeout_ms: u64 },

    /// The awaited job failed terminally
    #[error("Job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wrap an error from the dispatch path
    pub fn dispatch(err: impl std::fmt::Display) -> Self {
        AppError::Dispatch(err.to_string())
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
