// SQLite Broker - the Broker port on top of one SQLite database

use crate::events::SqliteEventStream;
use crate::queue::SqliteQueue;
use crate::store::JobStore;
use crate::worker::WorkerLoop;
use crate::{create_pool, run_migrations};
use async_trait::async_trait;
use conveyor_core::application::worker::ShutdownToken;
use conveyor_core::config::{QueueSettings, WorkerSettings};
use conveyor_core::error::Result;
use conveyor_core::port::id_provider::UuidProvider;
use conveyor_core::port::time_provider::SystemTimeProvider;
use conveyor_core::port::{
    Broker, EventStream, IdProvider, JobProcessor, QueueHandle, TimeProvider, WorkerRef,
};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Fallback poll period of event streams (appends in this process wake them sooner)
pub const DEFAULT_EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct SqliteBroker {
    store: Arc<JobStore>,
    open_streams: Arc<AtomicUsize>,
    event_poll_interval: Duration,
}

impl SqliteBroker {
    pub fn new(
        pool: SqlitePool,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            store: Arc::new(JobStore::new(pool, time_provider, id_provider)),
            open_streams: Arc::new(AtomicUsize::new(0)),
            event_poll_interval: DEFAULT_EVENT_POLL_INTERVAL,
        }
    }

    /// Open (creating if needed) and migrate the database at `database_url`
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        info!(database_url = %database_url, "SQLite broker ready");

        Ok(Self::new(
            pool,
            Arc::new(SystemTimeProvider),
            Arc::new(UuidProvider),
        ))
    }

    pub fn with_event_poll_interval(mut self, interval: Duration) -> Self {
        self.event_poll_interval = interval;
        self
    }

    /// Event streams opened and not yet closed
    pub fn open_event_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn open_queue(&self, name: &str, settings: &QueueSettings) -> Result<Arc<dyn QueueHandle>> {
        Ok(SqliteQueue::new(name, settings.clone(), Arc::clone(&self.store)))
    }

    async fn start_worker(
        &self,
        name: &str,
        processor: Arc<dyn JobProcessor>,
        settings: &WorkerSettings,
        shutdown: ShutdownToken,
    ) -> Result<WorkerRef> {
        let (tx, failures) = mpsc::unbounded_channel();
        let worker = WorkerLoop::new(name, Arc::clone(&self.store), processor, settings.clone(), tx);
        let handle = tokio::spawn(worker.run(shutdown));

        Ok(WorkerRef { handle, failures })
    }

    async fn open_event_stream(&self, name: &str) -> Result<Box<dyn EventStream>> {
        let stream = SqliteEventStream::open(
            Arc::clone(&self.store),
            name,
            self.event_poll_interval,
            Arc::clone(&self.open_streams),
        )
        .await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::application::worker::shutdown_channel;
    use conveyor_core::domain::{Backoff, Job, JobName, JobOptions, JobPayload, JobState, QueueEvent};
    use conveyor_core::error::AppError;
    use conveyor_core::port::ExecutionError;
    use serde_json::json;

    /// Succeeds with the payload unless the payload says `{"fail": "<reason>"}`
    struct PayloadProcessor;

    #[async_trait]
    impl JobProcessor for PayloadProcessor {
        async fn process(&self, job: &Job) -> std::result::Result<serde_json::Value, ExecutionError> {
            match job.payload.as_value().get("fail").and_then(|v| v.as_str()) {
                Some(reason) => Err(ExecutionError::failed(reason)),
                None => Ok(job.payload.as_value().clone()),
            }
        }
    }

    fn fast_worker() -> WorkerSettings {
        WorkerSettings {
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    async fn setup_broker() -> SqliteBroker {
        SqliteBroker::connect("sqlite::memory:").await.unwrap()
    }

    async fn enqueue(queue: &Arc<dyn QueueHandle>, payload: serde_json::Value, opts: JobOptions) -> String {
        queue
            .enqueue(&JobName::new("Test"), JobPayload::new(payload), opts)
            .await
            .unwrap()
            .id()
            .clone()
    }

    #[tokio::test]
    async fn test_worker_completes_job_and_publishes_event() {
        let broker = setup_broker().await;
        let queue = broker.open_queue("mail", &QueueSettings::default()).await.unwrap();
        let mut events = broker.open_event_stream("mail").await.unwrap();
        assert_eq!(broker.open_event_streams(), 1);

        let (shutdown, token) = shutdown_channel();
        let worker = broker
            .start_worker("mail", Arc::new(PayloadProcessor), &fast_worker(), token)
            .await
            .unwrap();

        let id = enqueue(&queue, json!({"sent": true}), JobOptions::default()).await;

        let event = tokio::time::timeout(Duration::from_secs(2), events.next_event())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event, QueueEvent::Completed { job_id: id.clone(), return_value: json!({"sent": true}) });

        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);

        events.close().await.unwrap();
        assert_eq!(broker.open_event_streams(), 0);

        shutdown.shutdown();
        worker.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_are_reported_then_fail_terminally() {
        let broker = setup_broker().await;
        let queue = broker.open_queue("mail", &QueueSettings::default()).await.unwrap();
        let (shutdown, token) = shutdown_channel();
        let mut worker = broker
            .start_worker("mail", Arc::new(PayloadProcessor), &fast_worker(), token)
            .await
            .unwrap();

        let opts = JobOptions {
            attempts: Some(3),
            backoff: Some(Backoff::fixed(10)),
            ..Default::default()
        };
        let id = enqueue(&queue, json!({"fail": "smtp down"}), opts).await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            let failure = tokio::time::timeout(Duration::from_secs(2), worker.failures.recv())
                .await
                .unwrap()
                .unwrap();
            let job = failure.job.unwrap();
            assert_eq!(failure.error, "smtp down");
            seen.push((job.attempts_made, job.is_terminal_failure()));
        }
        assert_eq!(seen, vec![(1, false), (2, false), (3, true)]);

        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failed_reason.as_deref(), Some("smtp down"));

        shutdown.shutdown();
        worker.handle.await.unwrap();
        assert!(worker.failures.recv().await.is_none(), "stream ends with the worker");
    }

    #[tokio::test]
    async fn test_event_stream_skips_history() {
        let broker = setup_broker().await;
        let queue = broker.open_queue("mail", &QueueSettings::default()).await.unwrap();
        let (shutdown, token) = shutdown_channel();
        let worker = broker
            .start_worker("mail", Arc::new(PayloadProcessor), &fast_worker(), token)
            .await
            .unwrap();

        let mut early = broker.open_event_stream("mail").await.unwrap();
        let first = enqueue(&queue, json!(1), JobOptions::default()).await;
        early.next_event().await.unwrap();

        let mut late = broker.open_event_stream("mail").await.unwrap();
        let second = enqueue(&queue, json!(2), JobOptions::default()).await;

        let event = tokio::time::timeout(Duration::from_secs(2), late.next_event())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.job_id(), second);
        assert_ne!(event.job_id(), first);

        early.close().await.unwrap();
        late.close().await.unwrap();
        shutdown.shutdown();
        worker.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_job_ref_wait_until_finished_times_out() {
        let broker = setup_broker().await;
        let queue = broker.open_queue("idle", &QueueSettings::default()).await.unwrap();
        let job = queue
            .enqueue(&JobName::new("Test"), JobPayload::new(json!({})), JobOptions::default())
            .await
            .unwrap();

        let mut events = broker.open_event_stream("idle").await.unwrap();
        let err = job
            .wait_until_finished(events.as_mut(), Duration::from_millis(20))
            .await
            .unwrap_err();
        events.close().await.unwrap();

        assert!(matches!(err, AppError::WaitTimeout { timeout_ms: 20, .. }));
        assert_eq!(job.refresh().await.unwrap().unwrap().state, JobState::Waiting);
        assert_eq!(broker.open_event_streams(), 0);
    }

    #[tokio::test]
    async fn test_dropped_event_stream_is_released() {
        let broker = setup_broker().await;
        broker.open_queue("mail", &QueueSettings::default()).await.unwrap();

        let mut events = broker.open_event_stream("mail").await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(20), events.next_event()).await;
        assert!(pending.is_err());
        assert_eq!(broker.open_event_streams(), 1);

        drop(events);
        assert_eq!(broker.open_event_streams(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_runs_jobs_in_parallel() {
        struct SlowProcessor;

        #[async_trait]
        impl JobProcessor for SlowProcessor {
            async fn process(&self, _job: &Job) -> std::result::Result<serde_json::Value, ExecutionError> {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(json!(null))
            }
        }

        let broker = setup_broker().await;
        let queue = broker.open_queue("bulk", &QueueSettings::default()).await.unwrap();
        for i in 0..4 {
            enqueue(&queue, json!(i), JobOptions::default()).await;
        }

        let settings = WorkerSettings {
            concurrency: 4,
            ..fast_worker()
        };
        let (shutdown, token) = shutdown_channel();
        let started = std::time::Instant::now();
        let worker = broker
            .start_worker("bulk", Arc::new(SlowProcessor), &settings, token)
            .await
            .unwrap();

        while queue.counts().await.unwrap().completed < 4 {
            assert!(started.elapsed() < Duration::from_secs(2), "jobs did not finish");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(started.elapsed() < Duration::from_millis(700));

        shutdown.shutdown();
        worker.handle.await.unwrap();
    }
}
