//! Messaging adapter error types.

use thiserror::Error;

pub type MessagingResult<T> = Result<T, MessagingError>;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Messaging API rejected the call: {status} {detail}")]
    ApiRejected { status: u16, detail: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MessagingError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
