// Worker - per-queue consumers that resolve and run job handlers

pub mod constants;
mod panic_guard;
mod shutdown;

use constants::SHUTDOWN_JOIN_TIMEOUT;
pub use panic_guard::execute_guarded;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::failure::FailureReporter;
use crate::config::WorkerSettings;
use crate::domain::{queue_or_default, validate_queue_name, Job, JobFailure};
use crate::error::Result;
use crate::port::{Broker, ExecutionError, HandlerResolver, JobProcessor};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Starts consumer loops on the broker
pub struct WorkerRunner {
    broker: Arc<dyn Broker>,
    resolver: Arc<dyn HandlerResolver>,
    settings: WorkerSettings,
}

impl WorkerRunner {
    pub fn new(
        broker: Arc<dyn Broker>,
        resolver: Arc<dyn HandlerResolver>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            broker,
            resolver,
            settings,
        }
    }

    /// Start a worker on `queue_name` (or "default")
    ///
    /// Failed attempts reported by the broker are fed to a `FailureReporter`
    /// on a companion task.
    pub async fn process(&self, queue_name: Option<&str>) -> Result<RunningWorker> {
        let queue = queue_or_default(queue_name).to_string();
        validate_queue_name(&queue)?;

        let (shutdown, token) = shutdown_channel();
        let processor: Arc<dyn JobProcessor> = Arc::new(HandlerDispatch::new(
            queue.clone(),
            Arc::clone(&self.resolver),
        ));

        let worker_ref = self
            .broker
            .start_worker(&queue, processor, &self.settings, token)
            .await?;

        let reporter = FailureReporter::new(queue.clone(), Arc::clone(&self.resolver));
        let reporter = tokio::spawn(forward_failures(reporter, worker_ref.failures));

        info!(
            queue = %queue,
            concurrency = self.settings.concurrency,
            "Worker listening on queue [{}]", queue
        );

        Ok(RunningWorker {
            queue,
            shutdown,
            worker: worker_ref.handle,
            reporter,
        })
    }

    /// Start one worker per queue name
    ///
    /// If any worker fails to start, the ones already running are shut down.
    pub async fn listen(&self, queue_names: &[String]) -> Result<Vec<RunningWorker>> {
        let mut workers = Vec::with_capacity(queue_names.len());
        for name in queue_names {
            match self.process(Some(name)).await {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    error!(queue = %name, error = %e, "Failed to start worker");
                    shutdown_all(workers).await;
                    return Err(e);
                }
            }
        }
        Ok(workers)
    }
}

/// Signal every worker, then wait for each to drain
pub async fn shutdown_all(workers: Vec<RunningWorker>) {
    for worker in &workers {
        worker.trigger_shutdown();
    }
    for worker in workers {
        worker.join().await;
    }
}

async fn forward_failures(reporter: FailureReporter, mut failures: mpsc::UnboundedReceiver<JobFailure>) {
    while let Some(failure) = failures.recv().await {
        reporter.report(&failure).await;
    }
}

/// A started worker and its failure-reporting task
pub struct RunningWorker {
    queue: String,
    shutdown: ShutdownSender,
    worker: JoinHandle<()>,
    reporter: JoinHandle<()>,
}

impl RunningWorker {
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Stop polling; in-flight jobs still finish
    pub fn trigger_shutdown(&self) {
        self.shutdown.shutdown();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Trigger shutdown and wait for the worker to drain
    pub async fn shutdown(self) {
        self.trigger_shutdown();
        self.join().await;
    }

    /// Wait for the worker loop and then its reporter to end
    ///
    /// Each gets `SHUTDOWN_JOIN_TIMEOUT` before it is aborted.
    pub async fn join(self) {
        join_or_abort(&self.queue, "worker", self.worker).await;
        join_or_abort(&self.queue, "failure reporter", self.reporter).await;
        info!(queue = %self.queue, "Worker stopped for queue [{}]", self.queue);
    }
}

async fn join_or_abort(queue: &str, what: &str, mut handle: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(queue = %queue, task = what, error = %e, "Task ended abnormally"),
        Err(_) => {
            warn!(
                queue = %queue,
                task = what,
                timeout_ms = SHUTDOWN_JOIN_TIMEOUT.as_millis() as u64,
                "Task did not stop in time, aborting"
            );
            handle.abort();
        }
    }
}

/// The processor handed to the broker: resolve by job name, then run
pub struct HandlerDispatch {
    queue: String,
    resolver: Arc<dyn HandlerResolver>,
}

impl HandlerDispatch {
    pub fn new(queue: impl Into<String>, resolver: Arc<dyn HandlerResolver>) -> Self {
        Self {
            queue: queue.into(),
            resolver,
        }
    }
}

#[async_trait]
impl JobProcessor for HandlerDispatch {
    async fn process(&self, job: &Job) -> std::result::Result<serde_json::Value, ExecutionError> {
        let handler = match self.resolver.resolve(job) {
            Ok(handler) => handler,
            Err(e) => {
                // The job still completes (with no result) so the loop moves on
                error!(queue = %self.queue, job_id = %job.id, error = %e, "{}", e);
                return Ok(serde_json::Value::Null);
            }
        };

        info!(queue = %self.queue, job_id = %job.id, "Job {} started", job.name);

        let payload = job.payload.clone();
        let result = execute_guarded(async move { handler.handle(&payload).await }).await;

        if result.is_ok() {
            info!(queue = %self.queue, job_id = %job.id, "Job {} finished", job.name);
        }
        result
    }
}
