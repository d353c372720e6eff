use std::time::Duration;
use thiserror::Error;

/// Result type for breaker operations
pub type Result<T> = std::result::Result<T, BreakerError>;

/// Breaker error types
///
/// Only configuration problems and persistence checkpoints surface through
/// this type. Failures of the protected operation are absorbed into breaker
/// state, and fallback failures are returned to the caller unchanged.
#[derive(Error, Debug)]
pub enum BreakerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown breaker: {0}")]
    UnknownBreaker(String),

    #[error("Invalid snapshot for breaker '{name}': {reason}")]
    InvalidSnapshot { name: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BreakerError {
    fn from(err: serde_json::Error) -> Self {
        BreakerError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for BreakerError {
    fn from(err: serde_yaml::Error) -> Self {
        BreakerError::Config(format!("Failed to parse config: {}", err))
    }
}

/// Raised by the gate when a bounded call outlives its deadline.
///
/// Callers opt in by making their operation error type `From<CallTimeout>`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Call to '{breaker}' timed out after {timeout:?}")]
pub struct CallTimeout {
    pub breaker: String,
    pub timeout: Duration,
}
