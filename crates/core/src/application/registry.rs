// Queue Registry - one broker queue handle per logical queue name

use crate::config::QueueSettings;
use crate::domain::{validate_queue_name, DEFAULT_QUEUE};
use crate::error::Result;
use crate::port::{Broker, QueueHandle};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Lazily opened, cached queue handles keyed by name
///
/// The map lock is held while a missing handle is opened, so concurrent first
/// access to one name opens exactly one handle.
pub struct QueueRegistry {
    broker: Arc<dyn Broker>,
    settings: QueueSettings,
    queues: Mutex<HashMap<String, Arc<dyn QueueHandle>>>,
}

impl QueueRegistry {
    /// Create the registry and eagerly open the default queue
    pub async fn new(broker: Arc<dyn Broker>, settings: QueueSettings) -> Result<Self> {
        let registry = Self {
            broker,
            settings,
            queues: Mutex::new(HashMap::new()),
        };
        registry.get_or_create(DEFAULT_QUEUE).await?;
        Ok(registry)
    }

    /// Cached handle for `name`, opening it on first reference
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<dyn QueueHandle>> {
        let mut queues = self.queues.lock().await;
        if let Some(handle) = queues.get(name) {
            return Ok(Arc::clone(handle));
        }

        validate_queue_name(name)?;
        let handle = self.broker.open_queue(name, &self.settings).await?;
        debug!(queue = %name, "Opened queue handle");
        queues.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Handle for `name` if it was already referenced
    pub async fn get(&self, name: &str) -> Option<Arc<dyn QueueHandle>> {
        self.queues.lock().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.queues.lock().await.contains_key(name)
    }

    /// Snapshot of every known queue, ordered by name
    pub async fn list(&self) -> BTreeMap<String, Arc<dyn QueueHandle>> {
        self.queues
            .lock()
            .await
            .iter()
            .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
            .collect()
    }

    /// Forget a queue; the next reference opens a fresh handle
    pub async fn remove(&self, name: &str) -> Option<Arc<dyn QueueHandle>> {
        self.queues.lock().await.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::broker::mocks::MockBroker;

    async fn setup() -> (Arc<MockBroker>, QueueRegistry) {
        let broker = Arc::new(MockBroker::new());
        let registry = QueueRegistry::new(broker.clone(), QueueSettings::default())
            .await
            .unwrap();
        (broker, registry)
    }

    #[tokio::test]
    async fn test_default_queue_exists_from_construction() {
        let (broker, registry) = setup().await;
        assert!(registry.contains(DEFAULT_QUEUE).await);
        assert_eq!(broker.opened_queues(), 1);
    }

    #[tokio::test]
    async fn test_same_name_returns_identical_handle() {
        let (broker, registry) = setup().await;

        let first = registry.get_or_create("mail").await.unwrap();
        let second = registry.get_or_create("mail").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(broker.opened_queues(), 2); // default + mail
    }

    #[tokio::test]
    async fn test_distinct_names_return_distinct_handles() {
        let (_broker, registry) = setup().await;

        let mail = registry.get_or_create("mail").await.unwrap();
        let reports = registry.get_or_create("reports").await.unwrap();

        assert!(!Arc::ptr_eq(&mail, &reports));
        assert_eq!(mail.name(), "mail");
        assert_eq!(reports.name(), "reports");
    }

    #[tokio::test]
    async fn test_concurrent_first_access_opens_once() {
        let (broker, registry) = setup().await;
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.get_or_create("burst").await.unwrap()
            }));
        }

        let mut opened = Vec::new();
        for handle in handles {
            opened.push(handle.await.unwrap());
        }

        assert!(opened.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(broker.opened_queues(), 2); // default + burst
    }

    #[tokio::test]
    async fn test_invalid_name_is_rejected_and_not_cached() {
        let (_broker, registry) = setup().await;

        assert!(registry.get_or_create("bad name!").await.is_err());
        assert!(!registry.contains("bad name!").await);
    }

    #[tokio::test]
    async fn test_list_is_sorted_snapshot() {
        let (_broker, registry) = setup().await;
        registry.get_or_create("zeta").await.unwrap();
        registry.get_or_create("alpha").await.unwrap();

        let names: Vec<String> = registry.list().await.into_keys().collect();
        assert_eq!(names, vec!["alpha", "default", "zeta"]);
    }

    #[tokio::test]
    async fn test_remove_then_reopen_gives_fresh_handle() {
        let (_broker, registry) = setup().await;
        let before = registry.get_or_create("mail").await.unwrap();

        assert!(registry.remove("mail").await.is_some());
        assert!(registry.get("mail").await.is_none());

        let after = registry.get_or_create("mail").await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
