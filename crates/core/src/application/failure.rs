// Failure Reporter - classify worker failures and run terminal callbacks

use crate::application::worker::execute_guarded;
use crate::domain::JobFailure;
use crate::port::HandlerResolver;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What the reporter did with one failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// More attempts remain; the broker will retry
    WillRetry,
    /// Terminal failure and the handler's `failed` callback ran
    CallbackInvoked,
    /// Terminal failure and the callback itself returned an error
    CallbackFailed(String),
    /// Terminal failure but no handler is registered for the job name
    HandlerMissing,
    /// The failure event carried no job record
    Orphaned,
}

/// Reacts to failed attempts reported by a worker
pub struct FailureReporter {
    queue: String,
    resolver: Arc<dyn HandlerResolver>,
}

impl FailureReporter {
    pub fn new(queue: impl Into<String>, resolver: Arc<dyn HandlerResolver>) -> Self {
        Self {
            queue: queue.into(),
            resolver,
        }
    }

    /// Log the failure, and on terminal failure call the handler's `failed`
    ///
    /// The callback runs on its own task; a panic there is reported as
    /// `CallbackFailed` and the reporter keeps going.
    pub async fn report(&self, failure: &JobFailure) -> FailureOutcome {
        error!(queue = %self.queue, error = %failure.error, "Job attempt failed");

        let Some(job) = &failure.job else {
            warn!(
                queue = %self.queue,
                error = %failure.error,
                "Orphaned failure: job record already removed, skipping failed callback"
            );
            return FailureOutcome::Orphaned;
        };

        if !job.is_terminal_failure() {
            info!(
                queue = %self.queue,
                job_id = %job.id,
                job = %job.name,
                attempts_made = job.attempts_made,
                attempts = job.opts.effective_attempts(),
                "Job will be retried"
            );
            return FailureOutcome::WillRetry;
        }

        let handler = match self.resolver.resolve(job) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(queue = %self.queue, job_id = %job.id, error = %e, "No handler for failed callback");
                return FailureOutcome::HandlerMissing;
            }
        };

        let owned = job.clone();
        match execute_guarded(async move { handler.failed(&owned).await }).await {
            Ok(()) => {
                info!(queue = %self.queue, job_id = %job.id, job = %job.name, "Failed callback completed");
                FailureOutcome::CallbackInvoked
            }
            Err(e) => {
                error!(queue = %self.queue, job_id = %job.id, job = %job.name, error = %e, "Failed callback errored");
                FailureOutcome::CallbackFailed(e.to_string())
            }
        }
    }
}
