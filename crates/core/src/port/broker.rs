// Broker Port (Interface)
// The persistent job broker: queue handles, workers and event streams

use crate::application::worker::ShutdownToken;
use crate::config::{QueueSettings, WorkerSettings};
use crate::domain::{
    Job, JobCounts, JobFailure, JobId, JobName, JobOptions, JobPayload, JobState, QueueEvent,
};
use crate::error::{AppError, Result};
use crate::port::handler::ExecutionError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Broker client: the entry point to a job broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open (or attach to) a named queue
    async fn open_queue(&self, name: &str, settings: &QueueSettings)
        -> Result<Arc<dyn QueueHandle>>;

    /// Start a consumer loop for a queue
    ///
    /// The loop runs `processor` for every delivered job until `shutdown`
    /// fires. Every failed attempt is reported on the returned `WorkerRef`.
    async fn start_worker(
        &self,
        name: &str,
        processor: Arc<dyn JobProcessor>,
        settings: &WorkerSettings,
        shutdown: ShutdownToken,
    ) -> Result<WorkerRef>;

    /// Subscribe to a queue's completion/failure events
    ///
    /// Only events published after the subscription opens are delivered.
    async fn open_event_stream(&self, name: &str) -> Result<Box<dyn EventStream>>;
}

/// Handle to one broker-side queue
#[async_trait]
pub trait QueueHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Atomically insert a job; `opts` are already merged and validated
    async fn enqueue(&self, name: &JobName, payload: JobPayload, opts: JobOptions)
        -> Result<JobRef>;

    /// Irreversibly delete the queue with all of its jobs and events
    async fn obliterate(&self) -> Result<()>;

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// Delete one job; returns false if it did not exist
    async fn remove_job(&self, id: &JobId) -> Result<bool>;

    async fn counts(&self) -> Result<JobCounts>;
}

/// Per-job callback the broker's consumer loop invokes
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job) -> std::result::Result<serde_json::Value, ExecutionError>;
}

/// Subscription to a queue's event stream
#[async_trait]
pub trait EventStream: Send {
    /// Next event, or `None` once the stream has ended
    async fn next_event(&mut self) -> Result<Option<QueueEvent>>;

    /// Release the subscription
    ///
    /// Dropping the stream releases it as well; `close` is the orderly path.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Counts one open subscription until released or dropped
#[derive(Debug)]
pub struct OpenStreamGuard {
    counter: Option<Arc<AtomicUsize>>,
}

impl OpenStreamGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Some(counter),
        }
    }

    /// Decrement the counter; later calls and the drop do nothing
    pub fn release(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// A running consumer loop
pub struct WorkerRef {
    pub handle: JoinHandle<()>,
    /// Failed attempts, in the order the loop observed them
    pub failures: mpsc::UnboundedReceiver<JobFailure>,
}

/// Reference to an enqueued job
#[derive(Clone)]
pub struct JobRef {
    job: Job,
    queue: Arc<dyn QueueHandle>,
}

impl std::fmt::Debug for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRef")
            .field("id", &self.job.id)
            .field("queue", &self.job.queue)
            .field("name", &self.job.name)
            .finish()
    }
}

impl JobRef {
    pub fn new(job: Job, queue: Arc<dyn QueueHandle>) -> Self {
        Self { job, queue }
    }

    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    pub fn name(&self) -> &JobName {
        &self.job.name
    }

    pub fn queue_name(&self) -> &str {
        &self.job.queue
    }

    /// Snapshot taken at enqueue time
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Current broker-side record, if the job still exists
    pub async fn refresh(&self) -> Result<Option<Job>> {
        self.queue.get_job(&self.job.id).await
    }

    /// Delete the job from the broker
    pub async fn remove(&self) -> Result<bool> {
        self.queue.remove_job(&self.job.id).await
    }

    /// Wait on `events` until this job completes, fails, or `timeout` elapses
    ///
    /// Returns the job's result on completion, `JobFailed` when it failed,
    /// `NotFound` when the record is already gone and `WaitTimeout` when the
    /// deadline passed first. The job itself is left as
    /// the broker has it.
    pub async fn wait_until_finished(
        &self,
        events: &mut dyn EventStream,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        match tokio::time::timeout(timeout, self.await_outcome(events)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::WaitTimeout {
                job_id: self.job.id.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn await_outcome(&self, events: &mut dyn EventStream) -> Result<serde_json::Value> {
        // The job may have finished, or been removed, before the subscription opened
        let Some(current) = self.refresh().await? else {
            return Err(AppError::NotFound(format!(
                "Job {} no longer exists in queue [{}]",
                self.job.id, self.job.queue
            )));
        };
        match current.state {
            JobState::Completed => {
                return Ok(current.return_value.unwrap_or(serde_json::Value::Null))
            }
            JobState::Failed => {
                return Err(AppError::JobFailed {
                    job_id: current.id,
                    reason: current.failed_reason.unwrap_or_default(),
                })
            }
            _ => {}
        }

        loop {
            match events.next_event().await? {
                Some(QueueEvent::Completed {
                    job_id,
                    return_value,
                }) if job_id == self.job.id => return Ok(return_value),
                Some(QueueEvent::Failed {
                    job_id,
                    failed_reason,
                }) if job_id == self.job.id => {
                    return Err(AppError::JobFailed {
                        job_id,
                        reason: failed_reason,
                    })
                }
                Some(_) => continue,
                None => {
                    return Err(AppError::Broker(format!(
                        "Event stream ended before job {} finished",
                        self.job.id
                    )))
                }
            }
        }
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    type JobStore = Arc<Mutex<HashMap<String, Vec<Job>>>>;

    /// In-memory broker: jobs live in a map, workers only run when a test
    /// delivers a job to them
    pub struct MockBroker {
        jobs: JobStore,
        events: broadcast::Sender<(String, QueueEvent)>,
        processors: Mutex<HashMap<String, Arc<dyn JobProcessor>>>,
        failure_senders: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<JobFailure>>>>,
        open_streams: Arc<AtomicUsize>,
        opened_queues: AtomicUsize,
        obliterated: Arc<Mutex<Vec<String>>>,
        reject_enqueue: Arc<AtomicBool>,
        next_id: Arc<AtomicUsize>,
    }

    impl Default for MockBroker {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockBroker {
        pub fn new() -> Self {
            let (events, _) = broadcast::channel(256);
            Self {
                jobs: Arc::new(Mutex::new(HashMap::new())),
                events,
                processors: Mutex::new(HashMap::new()),
                failure_senders: Arc::new(Mutex::new(HashMap::new())),
                open_streams: Arc::new(AtomicUsize::new(0)),
                opened_queues: AtomicUsize::new(0),
                obliterated: Arc::new(Mutex::new(Vec::new())),
                reject_enqueue: Arc::new(AtomicBool::new(false)),
                next_id: Arc::new(AtomicUsize::new(1)),
            }
        }

        /// Number of `open_queue` calls served
        pub fn opened_queues(&self) -> usize {
            self.opened_queues.load(Ordering::SeqCst)
        }

        /// Event streams opened and not yet closed
        pub fn open_event_streams(&self) -> usize {
            self.open_streams.load(Ordering::SeqCst)
        }

        pub fn obliterated(&self) -> Vec<String> {
            self.obliterated.lock().unwrap().clone()
        }

        /// Make every following enqueue fail (simulates a broker outage)
        pub fn reject_enqueue(&self, reject: bool) {
            self.reject_enqueue.store(reject, Ordering::SeqCst);
        }

        pub fn jobs(&self, queue: &str) -> Vec<Job> {
            self.jobs
                .lock()
                .unwrap()
                .get(queue)
                .cloned()
                .unwrap_or_default()
        }

        /// Mark a job completed and publish the event
        pub fn complete(&self, queue: &str, job_id: &str, value: serde_json::Value) {
            self.update(queue, job_id, |job| {
                job.state = JobState::Completed;
                job.attempts_made += 1;
                job.finished_on = Some(job.created_at + 1);
                job.return_value = Some(value.clone());
            });
            let _ = self.events.send((
                queue.to_string(),
                QueueEvent::Completed {
                    job_id: job_id.to_string(),
                    return_value: value,
                },
            ));
        }

        /// Mark a job failed and publish the event
        pub fn fail(&self, queue: &str, job_id: &str, reason: &str) {
            self.update(queue, job_id, |job| {
                job.state = JobState::Failed;
                job.attempts_made += 1;
                job.finished_on = Some(job.created_at + 1);
                job.failed_reason = Some(reason.to_string());
            });
            let _ = self.events.send((
                queue.to_string(),
                QueueEvent::Failed {
                    job_id: job_id.to_string(),
                    failed_reason: reason.to_string(),
                },
            ));
        }

        /// Run the worker processor registered for `queue` against `job`
        pub async fn deliver(
            &self,
            queue: &str,
            job: &Job,
        ) -> Option<std::result::Result<serde_json::Value, ExecutionError>> {
            let processor = self.processors.lock().unwrap().get(queue).cloned()?;
            Some(processor.process(job).await)
        }

        /// Push a failure onto the worker's failure stream
        pub fn report_failure(&self, queue: &str, failure: JobFailure) -> bool {
            match self.failure_senders.lock().unwrap().get(queue) {
                Some(tx) => tx.send(failure).is_ok(),
                None => false,
            }
        }

        fn update(&self, queue: &str, job_id: &str, f: impl FnOnce(&mut Job)) {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs
                .get_mut(queue)
                .and_then(|list| list.iter_mut().find(|j| j.id == job_id))
            {
                f(job);
            }
        }
    }

    #[async_trait]
    impl Broker for MockBroker {
        async fn open_queue(
            &self,
            name: &str,
            _settings: &QueueSettings,
        ) -> Result<Arc<dyn QueueHandle>> {
            self.opened_queues.fetch_add(1, Ordering::SeqCst);
            // Widen the window for concurrent first access
            tokio::task::yield_now().await;
            Ok(Arc::new(MockQueue {
                name: name.to_string(),
                jobs: Arc::clone(&self.jobs),
                obliterated: Arc::clone(&self.obliterated),
                reject_enqueue: Arc::clone(&self.reject_enqueue),
                next_id: Arc::clone(&self.next_id),
            }))
        }

        async fn start_worker(
            &self,
            name: &str,
            processor: Arc<dyn JobProcessor>,
            _settings: &WorkerSettings,
            mut shutdown: ShutdownToken,
        ) -> Result<WorkerRef> {
            let (tx, failures) = mpsc::unbounded_channel();
            self.processors
                .lock()
                .unwrap()
                .insert(name.to_string(), processor);
            self.failure_senders
                .lock()
                .unwrap()
                .insert(name.to_string(), tx);

            // Dropping the sender on shutdown ends the failure stream
            let senders = Arc::clone(&self.failure_senders);
            let queue = name.to_string();
            let handle = tokio::spawn(async move {
                if !shutdown.is_shutdown() {
                    shutdown.wait().await;
                }
                senders.lock().unwrap().remove(&queue);
            });
            Ok(WorkerRef { handle, failures })
        }

        async fn open_event_stream(&self, name: &str) -> Result<Box<dyn EventStream>> {
            Ok(Box::new(MockEventStream {
                queue: name.to_string(),
                rx: self.events.subscribe(),
                guard: OpenStreamGuard::new(Arc::clone(&self.open_streams)),
            }))
        }
    }

    /// Queue handle backed by the mock's shared job map
    pub struct MockQueue {
        name: String,
        jobs: JobStore,
        obliterated: Arc<Mutex<Vec<String>>>,
        reject_enqueue: Arc<AtomicBool>,
        next_id: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QueueHandle for MockQueue {
        fn name(&self) -> &str {
            &self.name
        }

        async fn enqueue(
            &self,
            name: &JobName,
            payload: JobPayload,
            opts: JobOptions,
        ) -> Result<JobRef> {
            if self.reject_enqueue.load(Ordering::SeqCst) {
                return Err(AppError::Broker("connection refused".to_string()));
            }

            let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            let job = Job::new(id, 1_000, self.name.clone(), name.clone(), payload, opts);
            self.jobs
                .lock()
                .unwrap()
                .entry(self.name.clone())
                .or_default()
                .push(job.clone());

            let handle: Arc<dyn QueueHandle> = Arc::new(MockQueue {
                name: self.name.clone(),
                jobs: Arc::clone(&self.jobs),
                obliterated: Arc::clone(&self.obliterated),
                reject_enqueue: Arc::clone(&self.reject_enqueue),
                next_id: Arc::clone(&self.next_id),
            });
            Ok(JobRef::new(job, handle))
        }

        async fn obliterate(&self) -> Result<()> {
            self.jobs.lock().unwrap().remove(&self.name);
            self.obliterated.lock().unwrap().push(self.name.clone());
            Ok(())
        }

        async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .get(&self.name)
                .and_then(|list| list.iter().find(|j| &j.id == id).cloned()))
        }

        async fn remove_job(&self, id: &JobId) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            let Some(list) = jobs.get_mut(&self.name) else {
                return Ok(false);
            };
            let before = list.len();
            list.retain(|j| &j.id != id);
            Ok(list.len() != before)
        }

        async fn counts(&self) -> Result<JobCounts> {
            let mut counts = JobCounts::default();
            for job in self.snapshot() {
                counts.set(job.state, counts.get(job.state) + 1);
            }
            Ok(counts)
        }
    }

    impl MockQueue {
        fn snapshot(&self) -> Vec<Job> {
            self.jobs
                .lock()
                .unwrap()
                .get(&self.name)
                .cloned()
                .unwrap_or_default()
        }
    }

    /// Broadcast-backed event stream filtered to one queue
    pub struct MockEventStream {
        queue: String,
        rx: broadcast::Receiver<(String, QueueEvent)>,
        guard: OpenStreamGuard,
    }

    #[async_trait]
    impl EventStream for MockEventStream {
        async fn next_event(&mut self) -> Result<Option<QueueEvent>> {
            loop {
                match self.rx.recv().await {
                    Ok((queue, event)) if queue == self.queue => return Ok(Some(event)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Ok(None),
                }
            }
        }

        async fn close(mut self: Box<Self>) -> Result<()> {
            self.guard.release();
            Ok(())
        }
    }
}
