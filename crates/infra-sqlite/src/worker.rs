// SQLite Worker Loop - poll, lock, run, record

use crate::store::{ActiveJob, JobStore};
use conveyor_core::application::worker::constants::ERROR_RECOVERY_SLEEP_DURATION;
use conveyor_core::application::worker::{execute_guarded, ShutdownToken};
use conveyor_core::config::WorkerSettings;
use conveyor_core::domain::JobFailure;
use conveyor_core::port::JobProcessor;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Consumer loop for one queue
#[derive(Clone)]
pub(crate) struct WorkerLoop {
    queue: String,
    store: Arc<JobStore>,
    processor: Arc<dyn JobProcessor>,
    settings: WorkerSettings,
    failures: mpsc::UnboundedSender<JobFailure>,
}

impl WorkerLoop {
    pub fn new(
        queue: impl Into<String>,
        store: Arc<JobStore>,
        processor: Arc<dyn JobProcessor>,
        settings: WorkerSettings,
        failures: mpsc::UnboundedSender<JobFailure>,
    ) -> Self {
        Self {
            queue: queue.into(),
            store,
            processor,
            settings,
            failures,
        }
    }

    /// Run until `shutdown` fires, then wait for in-flight jobs
    pub async fn run(self, mut shutdown: ShutdownToken) {
        let concurrency = self.settings.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let stalled_interval = self.settings.stalled_interval();
        let mut next_stall_check = Instant::now();

        info!(queue = %self.queue, concurrency, "Worker started for queue [{}]", self.queue);

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.wait() => break,
            };

            if Instant::now() >= next_stall_check {
                self.check_stalled().await;
                next_stall_check = Instant::now() + stalled_interval;
            }

            let idle = match self
                .store
                .pop_next(&self.queue, self.settings.lock_duration_ms)
                .await
            {
                Ok(Some(active)) => {
                    tokio::spawn(self.clone().run_job(active, permit));
                    continue;
                }
                Ok(None) => self.settings.poll_interval(),
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Worker error");
                    ERROR_RECOVERY_SLEEP_DURATION
                }
            };

            drop(permit);
            tokio::select! {
                _ = sleep(idle) => {}
                _ = shutdown.wait() => break,
            }
        }

        info!(queue = %self.queue, "Worker shutting down for queue [{}], draining in-flight jobs", self.queue);
        // Every permit back means every spawned job has finished
        let _ = permits.acquire_many(concurrency as u32).await;
        info!(queue = %self.queue, "Worker drained for queue [{}]", self.queue);
    }

    async fn check_stalled(&self) {
        match self
            .store
            .reclaim_stalled(&self.queue, self.settings.max_stalled_count)
            .await
        {
            Ok(failures) => {
                for failure in failures {
                    self.report(failure);
                }
            }
            Err(e) => error!(queue = %self.queue, error = %e, "Stalled job check failed"),
        }
    }

    /// Process one job while renewing its lock at half the lock duration
    async fn run_job(self, active: ActiveJob, _permit: OwnedSemaphorePermit) {
        let processor = Arc::clone(&self.processor);
        let job = active.job.clone();
        let execution = execute_guarded(async move { processor.process(&job).await });
        tokio::pin!(execution);

        let renew_every = self.settings.lock_renew_interval();
        let mut renew = tokio::time::interval_at(Instant::now() + renew_every, renew_every);

        let outcome = loop {
            tokio::select! {
                outcome = &mut execution => break outcome,
                _ = renew.tick() => self.renew_lock(&active).await,
            }
        };

        match outcome {
            Ok(value) => match self.store.complete(&active, &value).await {
                Ok(true) => debug!(queue = %self.queue, job_id = %active.job.id, "Job completed"),
                Ok(false) => warn!(queue = %self.queue, job_id = %active.job.id, "Job lock lost before completion was recorded"),
                Err(e) => error!(queue = %self.queue, job_id = %active.job.id, error = %e, "Failed to record completion"),
            },
            Err(exec_err) => {
                let reason = exec_err.to_string();
                match self.store.fail(&active, &reason).await {
                    Ok(Some(job)) => self.report(JobFailure {
                        job: Some(job),
                        error: reason,
                    }),
                    Ok(None) => warn!(queue = %self.queue, job_id = %active.job.id, "Job lock lost before failure was recorded"),
                    Err(e) => error!(queue = %self.queue, job_id = %active.job.id, error = %e, "Failed to record failure"),
                }
            }
        }
    }

    async fn renew_lock(&self, active: &ActiveJob) {
        match self
            .store
            .renew_lock(active, self.settings.lock_duration_ms)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(queue = %self.queue, job_id = %active.job.id, "Job lock lost while processing"),
            Err(e) => error!(queue = %self.queue, job_id = %active.job.id, error = %e, "Failed to renew job lock"),
        }
    }

    fn report(&self, failure: JobFailure) {
        if self.failures.send(failure).is_err() {
            debug!(queue = %self.queue, "Failure receiver dropped");
        }
    }
}
