// Queue configuration
// Loaded by the composition root; every section has workable defaults

use crate::domain::{JobOptions, DEFAULT_QUEUE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default broker location
pub const DEFAULT_DATABASE_URL: &str = "sqlite://~/.conveyor/queue.db";

/// Full queue configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub connection: ConnectionSettings,
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
    /// Global job defaults, overridden per key by dispatch options
    pub jobs: JobOptions,
    /// Queues `listen` starts when none are named explicitly
    pub queue_names: Vec<String>,
}

impl QueueConfig {
    /// Queue names to listen on: the explicit selection, else the configured
    /// set, else the default queue
    pub fn listen_targets(&self, explicit: &[String]) -> Vec<String> {
        if !explicit.is_empty() {
            return explicit.to_vec();
        }
        if !self.queue_names.is_empty() {
            return self.queue_names.clone();
        }
        vec![DEFAULT_QUEUE.to_string()]
    }
}

/// Broker connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub database_url: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

/// Settings applied to every queue handle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Events retained per queue before the oldest are trimmed
    pub max_events: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { max_events: 10_000 }
    }
}

/// Settings applied to every worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Jobs processed in parallel by one worker
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty
    pub poll_interval_ms: u64,
    /// Lease a worker holds on an active job; renewed at half-life
    pub lock_duration_ms: u64,
    /// How often expired leases are checked
    pub stalled_interval_ms: u64,
    /// Stalls tolerated before the job fails
    pub max_stalled_count: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval_ms: 100,
            lock_duration_ms: 30_000,
            stalled_interval_ms: 30_000,
            max_stalled_count: 1,
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    pub fn lock_renew_interval(&self) -> Duration {
        Duration::from_millis((self.lock_duration_ms / 2).max(1))
    }

    pub fn stalled_interval(&self) -> Duration {
        Duration::from_millis(self.stalled_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_targets_prefers_explicit() {
        let config = QueueConfig {
            queue_names: vec!["mail".to_string()],
            ..Default::default()
        };
        let targets = config.listen_targets(&["reports".to_string()]);
        assert_eq!(targets, vec!["reports".to_string()]);
    }

    #[test]
    fn test_listen_targets_falls_back_to_configured() {
        let config = QueueConfig {
            queue_names: vec!["mail".to_string(), "reports".to_string()],
            ..Default::default()
        };
        assert_eq!(config.listen_targets(&[]).len(), 2);
    }

    #[test]
    fn test_listen_targets_defaults_to_default_queue() {
        let config = QueueConfig::default();
        assert_eq!(config.listen_targets(&[]), vec![DEFAULT_QUEUE.to_string()]);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: QueueConfig = serde_json::from_value(serde_json::json!({
            "worker": {"concurrency": 4},
            "jobs": {"attempts": 3}
        }))
        .unwrap();

        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.poll_interval_ms, 100);
        assert_eq!(config.jobs.attempts, Some(3));
        assert_eq!(config.queue.max_events, 10_000);
        assert_eq!(config.connection.database_url, DEFAULT_DATABASE_URL);
    }
}
