// Queue Manager - one facade over registry, dispatcher, workers, waiter and admin

use crate::application::admin::QueueAdmin;
use crate::application::dispatcher::Dispatcher;
use crate::application::registry::QueueRegistry;
use crate::application::waiter::CompletionWaiter;
use crate::application::worker::{RunningWorker, WorkerRunner};
use crate::config::QueueConfig;
use crate::domain::{DispatchOptions, JobCounts, JobName, JobPayload, DEFAULT_QUEUE};
use crate::error::Result;
use crate::port::{Broker, HandlerResolver, JobRef, QueueHandle};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything a producer, a worker host or an operator needs, wired once
pub struct QueueManager {
    config: QueueConfig,
    registry: Arc<QueueRegistry>,
    dispatcher: Dispatcher,
    runner: WorkerRunner,
    waiter: CompletionWaiter,
    admin: QueueAdmin,
}

impl QueueManager {
    /// Build the manager; opens the default queue eagerly
    pub async fn new(
        broker: Arc<dyn Broker>,
        resolver: Arc<dyn HandlerResolver>,
        config: QueueConfig,
    ) -> Result<Self> {
        let registry =
            Arc::new(QueueRegistry::new(Arc::clone(&broker), config.queue.clone()).await?);

        Ok(Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry), config.jobs.clone()),
            runner: WorkerRunner::new(Arc::clone(&broker), resolver, config.worker.clone()),
            waiter: CompletionWaiter::new(broker),
            admin: QueueAdmin::new(Arc::clone(&registry)),
            registry,
            config,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    pub async fn get_or_create(&self, queue_name: &str) -> Result<Arc<dyn QueueHandle>> {
        self.registry.get_or_create(queue_name).await
    }

    pub async fn dispatch(
        &self,
        job_name: impl Into<JobName>,
        payload: impl Into<JobPayload>,
        options: DispatchOptions,
    ) -> Result<JobRef> {
        self.dispatcher.dispatch(job_name, payload, options).await
    }

    pub async fn process(&self, queue_name: Option<&str>) -> Result<RunningWorker> {
        self.runner.process(queue_name).await
    }

    /// Start workers on `queue_names`, else the configured names, else "default"
    pub async fn listen(&self, queue_names: &[String]) -> Result<Vec<RunningWorker>> {
        let targets = self.config.listen_targets(queue_names);
        self.runner.listen(&targets).await
    }

    pub async fn wait_until_finished(
        &self,
        job: &JobRef,
        queue_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        self.waiter
            .wait_until_finished(job, queue_name, timeout)
            .await
    }

    pub async fn clear(&self, queue_name: Option<&str>) -> Result<bool> {
        self.admin.clear(queue_name.unwrap_or(DEFAULT_QUEUE)).await
    }

    pub async fn list(&self) -> BTreeMap<String, Arc<dyn QueueHandle>> {
        self.admin.list().await
    }

    pub async fn get(&self, queue_name: Option<&str>) -> Option<Arc<dyn QueueHandle>> {
        self.admin.get(queue_name.unwrap_or(DEFAULT_QUEUE)).await
    }

    pub async fn counts(&self, queue_name: &str) -> Result<JobCounts> {
        self.admin.counts(queue_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::HandlerRegistry;
    use crate::application::worker::shutdown_all;
    use crate::domain::{Job, JobOptions};
    use crate::port::broker::mocks::MockBroker;
    use crate::port::handler::mocks::{CallCounts, MockBehavior, MockJobHandler};
    use serde_json::json;

    async fn setup(config: QueueConfig) -> (Arc<MockBroker>, CallCounts, QueueManager) {
        let broker = Arc::new(MockBroker::new());
        let counts = CallCounts::default();
        let shared = counts.clone();
        let handlers = HandlerRegistry::new().with("SendEmail", move |_job: &Job| {
            MockJobHandler::new(MockBehavior::Succeed(json!({"sent": true})), shared.clone())
        });
        let manager = QueueManager::new(broker.clone(), Arc::new(handlers), config)
            .await
            .unwrap();
        (broker, counts, manager)
    }

    #[tokio::test]
    async fn test_dispatch_process_and_wait() {
        let (broker, counts, manager) = setup(QueueConfig::default()).await;
        let worker = manager.process(Some("mail")).await.unwrap();

        let job = manager
            .dispatch(
                "SendEmail",
                json!({"to": "a@b.com"}),
                DispatchOptions::on_queue("mail"),
            )
            .await
            .unwrap();

        // Drive the mock broker the way a real consumer loop would
        let driver = {
            let broker = broker.clone();
            let stored = job.job().clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let value = broker.deliver("mail", &stored).await.unwrap().unwrap();
                broker.complete("mail", &stored.id, value);
            })
        };

        let result = manager
            .wait_until_finished(&job, None, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        driver.await.unwrap();

        assert_eq!(result, json!({"sent": true}));
        assert_eq!(counts.handle_calls(), 1);
        assert!(broker.jobs("mail").is_empty());
        assert_eq!(broker.open_event_streams(), 0);

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_listen_falls_back_to_configured_then_default() {
        let (_broker, _counts, manager) = setup(QueueConfig::default()).await;
        let workers = manager.listen(&[]).await.unwrap();
        assert_eq!(workers[0].queue_name(), "default");
        shutdown_all(workers).await;

        let config = QueueConfig {
            queue_names: vec!["mail".to_string(), "reports".to_string()],
            ..Default::default()
        };
        let (_broker, _counts, manager) = setup(config).await;
        let workers = manager.listen(&[]).await.unwrap();
        assert_eq!(workers.len(), 2);
        shutdown_all(workers).await;
    }

    #[tokio::test]
    async fn test_config_job_defaults_apply_to_dispatch() {
        let config = QueueConfig {
            jobs: JobOptions {
                attempts: Some(3),
                remove_on_complete: Some(true),
                ..Default::default()
            },
            ..Default::default()
        };
        let (broker, _counts, manager) = setup(config).await;

        manager
            .dispatch("SendEmail", json!({}), DispatchOptions::default())
            .await
            .unwrap();

        let stored = &broker.jobs("default")[0];
        assert_eq!(stored.opts.attempts, Some(3));
        assert_eq!(stored.opts.remove_on_complete, Some(true));
    }

    #[tokio::test]
    async fn test_admin_operations_default_to_default_queue() {
        let (_broker, _counts, manager) = setup(QueueConfig::default()).await;

        assert!(manager.get(None).await.is_some());
        assert!(manager.clear(None).await.unwrap());
        assert!(manager.get(None).await.is_none());
        assert!(!manager.clear(Some("nonexistent")).await.unwrap());
        assert!(manager.list().await.is_empty());
    }
}
