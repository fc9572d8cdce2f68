// Queue Administration - enumerate, look up and obliterate queues

use crate::application::registry::QueueRegistry;
use crate::domain::JobCounts;
use crate::error::{AppError, Result};
use crate::port::QueueHandle;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Operational access to the queues this process knows about
pub struct QueueAdmin {
    registry: Arc<QueueRegistry>,
}

impl QueueAdmin {
    pub fn new(registry: Arc<QueueRegistry>) -> Self {
        Self { registry }
    }

    /// Obliterate a known queue: every job and event is deleted and the
    /// registry entry is evicted
    ///
    /// Returns `false` (and touches nothing) when the queue is unknown.
    pub async fn clear(&self, queue_name: &str) -> Result<bool> {
        let Some(queue) = self.registry.get(queue_name).await else {
            info!("Queue [{}] doesn't exist", queue_name);
            return Ok(false);
        };

        queue.obliterate().await?;
        self.registry.remove(queue_name).await;

        info!("Queue [{}] cleared", queue_name);
        Ok(true)
    }

    /// Every queue referenced in this process, by name
    pub async fn list(&self) -> BTreeMap<String, Arc<dyn QueueHandle>> {
        self.registry.list().await
    }

    pub async fn get(&self, queue_name: &str) -> Option<Arc<dyn QueueHandle>> {
        self.registry.get(queue_name).await
    }

    /// Per-state job counts of a known queue
    pub async fn counts(&self, queue_name: &str) -> Result<JobCounts> {
        let queue = self
            .registry
            .get(queue_name)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Queue [{}] doesn't exist", queue_name)))?;
        queue.counts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatcher::Dispatcher;
    use crate::config::QueueSettings;
    use crate::domain::{DispatchOptions, JobOptions, DEFAULT_QUEUE};
    use crate::port::broker::mocks::MockBroker;
    use serde_json::json;

    async fn setup() -> (Arc<MockBroker>, Arc<QueueRegistry>, QueueAdmin) {
        let broker = Arc::new(MockBroker::new());
        let registry = Arc::new(
            QueueRegistry::new(broker.clone(), QueueSettings::default())
                .await
                .unwrap(),
        );
        let admin = QueueAdmin::new(registry.clone());
        (broker, registry, admin)
    }

    #[tokio::test]
    async fn test_clear_unknown_queue_is_noop() {
        let (broker, registry, admin) = setup().await;
        let before: Vec<String> = registry.list().await.into_keys().collect();

        let cleared = tokio_test::assert_ok!(admin.clear("nonexistent").await);

        assert!(!cleared);
        let after: Vec<String> = registry.list().await.into_keys().collect();
        assert_eq!(before, after);
        assert!(broker.obliterated().is_empty());
    }

    #[tokio::test]
    async fn test_clear_known_queue_obliterates_and_evicts() {
        let (broker, registry, admin) = setup().await;
        let dispatcher = Dispatcher::new(registry.clone(), JobOptions::default());
        dispatcher
            .dispatch("SendEmail", json!({}), DispatchOptions::on_queue("mail"))
            .await
            .unwrap();

        assert!(admin.clear("mail").await.unwrap());

        assert_eq!(broker.obliterated(), vec!["mail".to_string()]);
        assert!(broker.jobs("mail").is_empty());
        assert!(admin.get("mail").await.is_none());
    }

    #[tokio::test]
    async fn test_get_distinguishes_found_from_missing() {
        let (_broker, _registry, admin) = setup().await;

        let default = admin.get(DEFAULT_QUEUE).await;
        assert_eq!(default.map(|q| q.name().to_string()).as_deref(), Some(DEFAULT_QUEUE));
        assert!(admin.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_list_reflects_in_process_queues() {
        let (_broker, registry, admin) = setup().await;
        registry.get_or_create("reports").await.unwrap();

        let names: Vec<String> = admin.list().await.into_keys().collect();
        assert_eq!(names, vec!["default".to_string(), "reports".to_string()]);
    }

    #[tokio::test]
    async fn test_counts_of_known_and_unknown_queue() {
        let (_broker, registry, admin) = setup().await;
        let dispatcher = Dispatcher::new(registry, JobOptions::default());
        for _ in 0..2 {
            dispatcher
                .dispatch("SendEmail", json!({}), DispatchOptions::default())
                .await
                .unwrap();
        }

        let counts = admin.counts(DEFAULT_QUEUE).await.unwrap();
        assert_eq!(counts.waiting, 2);
        assert!(matches!(
            admin.counts("missing").await,
            Err(AppError::NotFound(_))
        ));
    }
}
