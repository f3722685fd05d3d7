//! Worker error taxonomy.
//!
//! Classification drives the retry decision: circuit-open and transient
//! upstream failures retry within the queue contract; permanent upstream
//! failures and validation skip straight to the fallback path.

use thiserror::Error;

use reelscript_breaker::CircuitOpen;
use reelscript_media::MediaError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),

    #[error("Upstream failure ({service}): {message}")]
    Upstream { service: &'static str, message: String },

    #[error("Permanent upstream failure ({service}): {message}")]
    PermanentUpstream { service: &'static str, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(#[from] reelscript_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] reelscript_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream { service, message: message.into() }
    }

    pub fn permanent(service: &'static str, message: impl Into<String>) -> Self {
        Self::PermanentUpstream { service, message: message.into() }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Lift a media error, keeping the permanent/transient split.
    pub fn from_media(service: &'static str, e: MediaError) -> Self {
        if e.is_permanent() {
            Self::permanent(service, e.to_string())
        } else {
            Self::upstream(service, e.to_string())
        }
    }

    /// Whether the queue should redeliver after this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::CircuitOpen(_) => true,
            WorkerError::Upstream { .. } => true,
            WorkerError::Store(e) => e.is_retryable(),
            WorkerError::Queue(_) => true,
            WorkerError::Timeout(_) => true,
            WorkerError::Io(_) => true,
            WorkerError::PermanentUpstream { .. }
            | WorkerError::ConfigError(_)
            | WorkerError::Internal(_) => false,
        }
    }

    /// One-word classification for job records and metrics.
    pub fn class(&self) -> &'static str {
        match self {
            WorkerError::Timeout(_) => "timeout",
            WorkerError::CircuitOpen(_) => "circuit_open",
            WorkerError::Upstream { .. } => "upstream",
            WorkerError::PermanentUpstream { .. } => "permanent_upstream",
            WorkerError::ConfigError(_) => "config",
            WorkerError::Store(_) => "store",
            WorkerError::Queue(_) => "queue",
            WorkerError::Io(_) => "io",
            WorkerError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability_split() {
        assert!(WorkerError::upstream("download", "x").is_retryable());
        assert!(WorkerError::Timeout(300).is_retryable());
        assert!(!WorkerError::permanent("download", "login").is_retryable());
        assert!(!WorkerError::internal("bug").is_retryable());
    }

    #[test]
    fn test_media_error_lift_preserves_permanence() {
        let permanent = WorkerError::from_media("download", MediaError::LoginRequired);
        assert!(!permanent.is_retryable());

        let transient = WorkerError::from_media("download", MediaError::RateLimited);
        assert!(transient.is_retryable());
    }

    #[test]
    fn test_timeout_class_label() {
        assert_eq!(WorkerError::Timeout(300).class(), "timeout");
    }
}
