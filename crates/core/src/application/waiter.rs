// Completion Waiter - block on a job's outcome over a transient subscription

use crate::application::worker::constants::DEFAULT_WAIT_TIMEOUT;
use crate::error::Result;
use crate::port::{Broker, JobRef};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Waits for individual jobs to finish
pub struct CompletionWaiter {
    broker: Arc<dyn Broker>,
}

impl CompletionWaiter {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Wait until `job` finishes, up to `timeout` (default 10 minutes)
    ///
    /// Subscribes to `queue_name` (defaults to the job's own queue). On
    /// completion the job is removed from the broker and its result returned.
    /// The subscription is closed on every path; if this future is dropped
    /// mid-wait, dropping the stream releases it.
    pub async fn wait_until_finished(
        &self,
        job: &JobRef,
        queue_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let queue = queue_name.unwrap_or_else(|| job.queue_name());
        let timeout = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);

        let mut events = self.broker.open_event_stream(queue).await?;
        debug!(job_id = %job.id(), queue = %queue, timeout_ms = timeout.as_millis() as u64, "Waiting for job");

        let outcome = job.wait_until_finished(events.as_mut(), timeout).await;

        if let Err(e) = events.close().await {
            warn!(queue = %queue, error = %e, "Failed to close event stream");
        }

        let value = outcome?;

        // Storage reclamation; the result is already in hand
        match job.remove().await {
            Ok(_) => {}
            Err(e) => warn!(job_id = %job.id(), error = %e, "Failed to remove finished job"),
        }

        Ok(value)
    }
}
