// Queue events published by the broker

use crate::domain::{Job, JobId};
use serde::{Deserialize, Serialize};

/// Terminal transition of a job, as seen on a queue's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum QueueEvent {
    Completed {
        job_id: JobId,
        return_value: serde_json::Value,
    },
    Failed {
        job_id: JobId,
        failed_reason: String,
    },
}

impl QueueEvent {
    pub fn job_id(&self) -> &str {
        match self {
            QueueEvent::Completed { job_id, .. } | QueueEvent::Failed { job_id, .. } => job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::Completed { .. } => "completed",
            QueueEvent::Failed { .. } => "failed",
        }
    }
}

/// A failed attempt reported by a running worker
///
/// `job` is `None` when the broker already discarded the record, which happens
/// when a job exceeds its stall limit and was dispatched with `remove_on_fail`.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub job: Option<Job>,
    pub error: String,
}
