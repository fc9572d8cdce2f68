// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Unknown job state: {0}")]
    UnknownState(String),

    #[error("Invalid priority: {0} (max {max})", max = crate::domain::options::MAX_PRIORITY)]
    InvalidPriority(u32),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
