// Job and dispatch options

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Highest priority value the broker accepts (lower values run first)
pub const MAX_PRIORITY: u32 = 2_097_152;

/// Longest delay or backoff base accepted, in milliseconds (one year)
pub const MAX_DELAY_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Backoff strategy between failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Backoff policy: strategy plus base delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    /// Base delay in milliseconds
    pub delay: u64,
}

impl Backoff {
    pub fn fixed(delay: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay,
        }
    }

    pub fn exponential(delay: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay,
        }
    }

    /// Delay before the next attempt, given how many attempts already failed
    ///
    /// fixed: delay
    /// exponential: delay * 2^(attempts_made - 1)
    pub fn delay_for(&self, attempts_made: u32) -> u64 {
        match self.kind {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1).min(32);
                self.delay.saturating_mul(1u64 << exponent)
            }
        }
    }
}

/// Per-job options handed to the broker
///
/// Every field is optional so that option layers can be merged key by key:
/// a `Some` in a more specific layer replaces the value of a less specific one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,

    /// Milliseconds before the job becomes eligible for processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    /// 0 = no priority (served first); otherwise lower values are served first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_complete: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_on_fail: Option<bool>,
}

impl JobOptions {
    /// Overlay `self` on top of `defaults`; keys set in `self` win
    pub fn merged_over(&self, defaults: &JobOptions) -> JobOptions {
        JobOptions {
            attempts: self.attempts.or(defaults.attempts),
            backoff: self.backoff.or(defaults.backoff),
            delay: self.delay.or(defaults.delay),
            priority: self.priority.or(defaults.priority),
            remove_on_complete: self.remove_on_complete.or(defaults.remove_on_complete),
            remove_on_fail: self.remove_on_fail.or(defaults.remove_on_fail),
        }
    }

    /// Attempt limit the broker enforces (a job always runs at least once)
    pub fn effective_attempts(&self) -> u32 {
        self.attempts.unwrap_or(1).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(attempts) = self.attempts {
            if attempts == 0 {
                return Err(DomainError::ValidationError(
                    "attempts must be at least 1".to_string(),
                ));
            }
        }

        if let Some(priority) = self.priority {
            if priority > MAX_PRIORITY {
                return Err(DomainError::InvalidPriority(priority));
            }
        }

        if let Some(delay) = self.delay {
            if delay > MAX_DELAY_MS {
                return Err(DomainError::ValidationError(format!(
                    "delay must be at most {}ms",
                    MAX_DELAY_MS
                )));
            }
        }

        if let Some(backoff) = self.backoff {
            if backoff.delay == 0 {
                return Err(DomainError::ValidationError(
                    "backoff delay must be greater than 0".to_string(),
                ));
            }
            if backoff.delay > MAX_DELAY_MS {
                return Err(DomainError::ValidationError(format!(
                    "backoff delay must be at most {}ms",
                    MAX_DELAY_MS
                )));
            }
        }

        Ok(())
    }
}

/// Options accepted by `dispatch`: job options plus the target queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,

    #[serde(flatten)]
    pub job: JobOptions,
}

impl DispatchOptions {
    pub fn on_queue(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: Some(queue_name.into()),
            ..Default::default()
        }
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.job.attempts = Some(attempts);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.job.backoff = Some(backoff);
        self
    }

    pub fn delay(mut self, delay_ms: u64) -> Self {
        self.job.delay = Some(delay_ms);
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.job.priority = Some(priority);
        self
    }

    pub fn remove_on_complete(mut self, remove: bool) -> Self {
        self.job.remove_on_complete = Some(remove);
        self
    }

    pub fn remove_on_fail(mut self, remove: bool) -> Self {
        self.job.remove_on_fail = Some(remove);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_time_options_win_per_key() {
        let defaults = JobOptions {
            attempts: Some(3),
            ..Default::default()
        };
        let call = JobOptions {
            attempts: Some(5),
            delay: Some(100),
            ..Default::default()
        };

        let merged = call.merged_over(&defaults);
        assert_eq!(
            merged,
            JobOptions {
                attempts: Some(5),
                delay: Some(100),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let defaults = JobOptions {
            attempts: Some(3),
            backoff: Some(Backoff::fixed(1000)),
            remove_on_complete: Some(true),
            ..Default::default()
        };
        let call = JobOptions {
            priority: Some(7),
            ..Default::default()
        };

        let merged = call.merged_over(&defaults);
        assert_eq!(merged.attempts, Some(3));
        assert_eq!(merged.backoff, Some(Backoff::fixed(1000)));
        assert_eq!(merged.priority, Some(7));
        assert_eq!(merged.remove_on_complete, Some(true));
        assert_eq!(merged.delay, None);
    }

    #[test]
    fn test_effective_attempts_defaults_to_one() {
        assert_eq!(JobOptions::default().effective_attempts(), 1);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let opts = JobOptions {
            attempts: Some(0),
            ..Default::default()
        };
        let err = opts.validate().unwrap_err();
        assert!(err.to_string().contains("attempts"));
    }

    #[test]
    fn test_validate_rejects_priority_out_of_range() {
        let opts = JobOptions {
            priority: Some(MAX_PRIORITY + 1),
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(DomainError::InvalidPriority(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_backoff_delay() {
        let opts = JobOptions {
            backoff: Some(Backoff::exponential(0)),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_delay_beyond_limit() {
        let opts = JobOptions {
            delay: Some(i64::MAX as u64),
            ..Default::default()
        };
        let err = opts.validate().unwrap_err();
        assert!(err.to_string().contains("delay"));

        let at_limit = JobOptions {
            delay: Some(MAX_DELAY_MS),
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_backoff_delay_beyond_limit() {
        let opts = JobOptions {
            backoff: Some(Backoff::fixed(u64::MAX)),
            ..Default::default()
        };
        assert!(opts.validate().unwrap_err().to_string().contains("backoff"));
    }

    #[test]
    fn test_exponential_backoff_saturates() {
        let backoff = Backoff::exponential(MAX_DELAY_MS);
        assert_eq!(backoff.delay_for(u32::MAX), MAX_DELAY_MS.saturating_mul(1 << 32));
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let backoff = Backoff::exponential(100);
        assert_eq!(backoff.delay_for(1), 100);
        assert_eq!(backoff.delay_for(2), 200);
        assert_eq!(backoff.delay_for(3), 400);
    }

    #[test]
    fn test_fixed_backoff_is_constant() {
        let backoff = Backoff::fixed(250);
        assert_eq!(backoff.delay_for(1), 250);
        assert_eq!(backoff.delay_for(4), 250);
    }

    #[test]
    fn test_dispatch_options_deserialize_flat() {
        let opts: DispatchOptions = serde_json::from_value(serde_json::json!({
            "queueName": "mail",
            "attempts": 5,
            "backoff": {"type": "exponential", "delay": 1000},
            "removeOnComplete": true
        }))
        .unwrap();

        assert_eq!(opts.queue_name.as_deref(), Some("mail"));
        assert_eq!(opts.job.attempts, Some(5));
        assert_eq!(opts.job.backoff, Some(Backoff::exponential(1000)));
        assert_eq!(opts.job.remove_on_complete, Some(true));
    }
}
