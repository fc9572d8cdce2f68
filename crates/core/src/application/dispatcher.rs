// Dispatcher - validate, merge options and enqueue

use crate::application::registry::QueueRegistry;
use crate::domain::{
    queue_or_default, validate_queue_name, DispatchOptions, JobName, JobOptions, JobPayload,
};
use crate::error::{AppError, Result};
use crate::port::JobRef;
use std::sync::Arc;
use tracing::{debug, error};

/// Inserts jobs into named queues
pub struct Dispatcher {
    registry: Arc<QueueRegistry>,
    defaults: JobOptions,
}

impl Dispatcher {
    /// # Arguments
    /// * `registry` - Queue registry used to resolve the target queue
    /// * `defaults` - Global job defaults; call-time options win per key
    pub fn new(registry: Arc<QueueRegistry>, defaults: JobOptions) -> Self {
        Self { registry, defaults }
    }

    /// Enqueue `job_name` with `payload` on `options.queue_name` (or "default")
    ///
    /// Returns as soon as the broker accepted the job. Validation failures and
    /// broker rejections surface as `AppError::Dispatch` and are not retried.
    pub async fn dispatch(
        &self,
        job_name: impl Into<JobName>,
        payload: impl Into<JobPayload>,
        options: DispatchOptions,
    ) -> Result<JobRef> {
        let job_name = job_name.into();
        let queue_name = queue_or_default(options.queue_name.as_deref()).to_string();

        validate_request(&job_name, &queue_name).map_err(AppError::dispatch)?;
        let opts = options.job.merged_over(&self.defaults);
        opts.validate().map_err(AppError::dispatch)?;

        let queue = self
            .registry
            .get_or_create(&queue_name)
            .await
            .map_err(AppError::dispatch)?;

        let job = queue
            .enqueue(&job_name, payload.into(), opts)
            .await
            .map_err(|e| {
                error!(job = %job_name, queue = %queue_name, error = %e, "Enqueue rejected");
                AppError::dispatch(e)
            })?;

        debug!(
            job_id = %job.id(),
            job = %job_name,
            queue = %queue_name,
            "Job dispatched"
        );
        Ok(job)
    }
}

/// Reject requests the broker should never see
fn validate_request(job_name: &JobName, queue_name: &str) -> Result<()> {
    if job_name.as_str().trim().is_empty() {
        return Err(AppError::Validation("Job name cannot be empty".to_string()));
    }
    validate_queue_name(queue_name)?;
    Ok(())
}
