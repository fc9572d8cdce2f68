// SQLite Queue Handle

use crate::store::JobStore;
use async_trait::async_trait;
use conveyor_core::config::QueueSettings;
use conveyor_core::domain::{Job, JobCounts, JobId, JobName, JobOptions, JobPayload};
use conveyor_core::error::{AppError, Result};
use conveyor_core::port::{JobRef, QueueHandle};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// One named queue inside the SQLite broker
pub struct SqliteQueue {
    name: String,
    settings: QueueSettings,
    store: Arc<JobStore>,
    /// Back-reference handed to every `JobRef` this queue creates
    this: Weak<SqliteQueue>,
}

impl SqliteQueue {
    pub(crate) fn new(name: &str, settings: QueueSettings, store: Arc<JobStore>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name: name.to_string(),
            settings,
            store,
            this: this.clone(),
        })
    }

    fn job_ref(&self, job: Job) -> Option<JobRef> {
        let handle: Arc<dyn QueueHandle> = self.this.upgrade()?;
        Some(JobRef::new(job, handle))
    }
}

#[async_trait]
impl QueueHandle for SqliteQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, name: &JobName, payload: JobPayload, opts: JobOptions) -> Result<JobRef> {
        let job = self.store.insert(&self.name, name, payload, opts).await?;
        debug!(queue = %self.name, job_id = %job.id, job = %job.name, state = %job.state, "Job enqueued");

        match self.store.trim_events(&self.name, self.settings.max_events).await {
            Ok(0) => {}
            Ok(trimmed) => debug!(queue = %self.name, trimmed, "Trimmed events"),
            Err(e) => warn!(queue = %self.name, error = %e, "Failed to trim events"),
        }

        self.job_ref(job).ok_or_else(|| {
            AppError::Internal(format!("Queue [{}] handle dropped", self.name))
        })
    }

    async fn obliterate(&self) -> Result<()> {
        self.store.obliterate(&self.name).await?;
        info!(queue = %self.name, "Queue obliterated");
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        self.store.find(&self.name, id).await
    }

    async fn remove_job(&self, id: &JobId) -> Result<bool> {
        self.store.delete(&self.name, id).await
    }

    async fn counts(&self) -> Result<JobCounts> {
        self.store.counts(&self.name).await
    }
}
