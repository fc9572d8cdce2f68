// Handler Registry - explicit name -> constructor dispatch table

use crate::domain::Job;
use crate::port::{HandlerNotFound, HandlerResolver, JobHandler};
use std::collections::HashMap;
use std::sync::Arc;

type HandlerFactory = Arc<dyn Fn(&Job) -> Box<dyn JobHandler> + Send + Sync>;

/// Handlers registered by job name, populated at startup
///
/// Each delivered job gets a fresh handler instance built from the job.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for jobs named `name`; replaces any previous one
    pub fn register<F, H>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Job) -> H + Send + Sync + 'static,
        H: JobHandler + 'static,
    {
        self.factories.insert(
            name.into(),
            Arc::new(move |job: &Job| Box::new(factory(job)) as Box<dyn JobHandler>),
        );
        self
    }

    /// Builder-style `register`
    pub fn with<F, H>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Job) -> H + Send + Sync + 'static,
        H: JobHandler + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered job names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl HandlerResolver for HandlerRegistry {
    fn resolve(&self, job: &Job) -> Result<Box<dyn JobHandler>, HandlerNotFound> {
        self.factories
            .get(job.name.as_str())
            .map(|factory| factory(job))
            .ok_or_else(|| HandlerNotFound(job.name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobName, JobOptions, JobPayload};
    use crate::port::handler::mocks::{CallCounts, MockBehavior, MockJobHandler};
    use serde_json::json;

    fn job(name: &str) -> Job {
        Job::new(
            "job-1",
            0,
            "default",
            JobName::new(name),
            JobPayload::new(json!({"to": "a@b.com"})),
            JobOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_resolve_registered_handler() {
        let counts = CallCounts::default();
        let shared = counts.clone();
        let registry = HandlerRegistry::new().with("SendEmail", move |_job: &Job| {
            MockJobHandler::new(MockBehavior::Succeed(json!({"sent": true})), shared.clone())
        });

        let job = job("SendEmail");
        let handler = registry.resolve(&job).unwrap();
        let result = handler.handle(&job.payload).await.unwrap();

        assert_eq!(result, json!({"sent": true}));
        assert_eq!(counts.handle_calls(), 1);
    }

    #[test]
    fn test_resolve_unknown_name_is_typed_not_found() {
        let registry = HandlerRegistry::new();
        let err = registry.resolve(&job("Missing")).err().unwrap();
        assert_eq!(err, HandlerNotFound("Missing".to_string()));
        assert_eq!(err.to_string(), "Job handler for Missing not found");
    }

    #[test]
    fn test_names_sorted() {
        let counts = CallCounts::default();
        let mut registry = HandlerRegistry::new();
        for name in ["b", "a", "c"] {
            let counts = counts.clone();
            registry.register(name, move |_job: &Job| {
                MockJobHandler::new(MockBehavior::Echo, counts.clone())
            });
        }
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
        assert!(registry.contains("a"));
        assert!(!registry.contains("d"));
    }
}
