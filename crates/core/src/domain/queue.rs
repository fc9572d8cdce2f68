// Queue Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::JobState;
use serde::{Deserialize, Serialize};

/// Queue identifier
pub type QueueId = String;

/// Queue used whenever a caller names none
pub const DEFAULT_QUEUE: &str = "default";

/// Maximum queue name length
pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Resolve an optional queue name to the default queue
pub fn queue_or_default(name: Option<&str>) -> &str {
    name.unwrap_or(DEFAULT_QUEUE)
}

/// Validate a queue name: non-empty, bounded, [A-Za-z0-9_.:-]
pub fn validate_queue_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DomainError::ValidationError(
            "Queue name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(DomainError::ValidationError(format!(
            "Queue name too long (max {} chars)",
            MAX_QUEUE_NAME_LEN
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(DomainError::ValidationError(format!(
            "Queue name '{}' must be alphanumeric (plus _ - . :)",
            name
        )));
    }

    Ok(())
}

/// Number of jobs per state in one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Delayed => self.delayed,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
        }
    }

    pub fn set(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Waiting => self.waiting = count,
            JobState::Delayed => self.delayed = count,
            JobState::Active => self.active = count,
            JobState::Completed => self.completed = count,
            JobState::Failed => self.failed = count,
        }
    }

    pub fn total(&self) -> u64 {
        self.waiting + self.delayed + self.active + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_queue_name_empty() {
        let err = validate_queue_name("").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_validate_queue_name_too_long() {
        let err = validate_queue_name(&"a".repeat(65)).unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_validate_queue_name_invalid_chars() {
        let err = validate_queue_name("invalid@queue!").unwrap_err();
        assert!(err.to_string().contains("alphanumeric"));
    }

    #[test]
    fn test_validate_queue_name_accepts_separators() {
        assert!(validate_queue_name("mail").is_ok());
        assert!(validate_queue_name("reports:daily-v2.eu_west").is_ok());
    }

    #[test]
    fn test_queue_or_default() {
        assert_eq!(queue_or_default(None), DEFAULT_QUEUE);
        assert_eq!(queue_or_default(Some("mail")), "mail");
    }

    #[test]
    fn test_job_counts_total() {
        let mut counts = JobCounts::default();
        counts.set(JobState::Waiting, 2);
        counts.set(JobState::Failed, 1);
        assert_eq!(counts.get(JobState::Waiting), 2);
        assert_eq!(counts.total(), 3);
    }
}
