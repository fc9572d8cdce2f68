// Job Domain Model

use crate::domain::options::JobOptions;
use serde::{Deserialize, Serialize};

/// Broker-assigned job ID (UUID v4 for the bundled adapter)
pub type JobId = String;

/// Job State as tracked by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Delayed,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Completed and failed are final; everything else may still run
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = crate::domain::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(crate::domain::DomainError::UnknownState(other.to_string())),
        }
    }
}

/// Job name: selects the handler that executes the job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobName(String);

impl JobName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Job Payload (JSON serializable, opaque to the queue layer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Deserialize the payload into a handler's typed arguments
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.0)
    }
}

impl From<serde_json::Value> for JobPayload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Job record as seen through the broker
///
/// The broker owns every field below; the queue layer reads them to classify
/// failures and to report results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub name: JobName,
    pub payload: JobPayload,
    /// Effective options after merging defaults and call-time overrides
    pub opts: JobOptions,
    pub state: JobState,

    pub attempts_made: u32,
    pub stalled_count: u32,

    pub created_at: i64, // epoch ms
    pub processed_on: Option<i64>,
    pub finished_on: Option<i64>,

    pub return_value: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
}

impl Job {
    /// Create a freshly enqueued job with explicit ID and timestamp
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        queue: impl Into<String>,
        name: JobName,
        payload: JobPayload,
        opts: JobOptions,
    ) -> Self {
        let state = if opts.delay.unwrap_or(0) > 0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        Self {
            id: id.into(),
            queue: queue.into(),
            name,
            payload,
            opts,
            state,
            attempts_made: 0,
            stalled_count: 0,
            created_at,
            processed_on: None,
            finished_on: None,
            return_value: None,
            failed_reason: None,
        }
    }

    /// Whether this failure is the last one the broker will report
    ///
    /// Terminal when every configured attempt has been used, or when the broker
    /// already stamped a finish time (the job moved to the failed set).
    pub fn is_terminal_failure(&self) -> bool {
        self.attempts_made >= self.opts.effective_attempts() || self.finished_on.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with_attempts(attempts: u32) -> Job {
        Job::new(
            "job-1",
            1_000,
            "default",
            JobName::new("SendEmail"),
            JobPayload::new(json!({"to": "a@b.com"})),
            JobOptions {
                attempts: Some(attempts),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_new_job_is_waiting() {
        let job = job_with_attempts(3);
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts_made, 0);
        assert!(job.finished_on.is_none());
    }

    #[test]
    fn test_delayed_job_starts_delayed() {
        let job = Job::new(
            "job-2",
            1_000,
            "default",
            JobName::new("Later"),
            JobPayload::new(json!({})),
            JobOptions {
                delay: Some(500),
                ..Default::default()
            },
        );
        assert_eq!(job.state, JobState::Delayed);
    }

    #[test]
    fn test_first_of_three_attempts_is_not_terminal() {
        let mut job = job_with_attempts(3);
        job.attempts_made = 1;
        assert!(!job.is_terminal_failure());
    }

    #[test]
    fn test_last_attempt_is_terminal() {
        let mut job = job_with_attempts(3);
        job.attempts_made = 3;
        assert!(job.is_terminal_failure());
    }

    #[test]
    fn test_finished_job_is_terminal_regardless_of_attempts() {
        let mut job = job_with_attempts(5);
        job.attempts_made = 1;
        job.finished_on = Some(2_000);
        assert!(job.is_terminal_failure());
    }

    #[test]
    fn test_job_state_round_trips_through_str() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("bogus".parse::<JobState>().is_err());
    }

    #[test]
    fn test_payload_parse() {
        #[derive(serde::Deserialize)]
        struct Email {
            to: String,
        }
        let payload = JobPayload::new(json!({"to": "a@b.com"}));
        let email: Email = payload.parse().unwrap();
        assert_eq!(email.to, "a@b.com");
    }
}
