//! API error taxonomy.
//!
//! The ingress recovers nothing: an error is mapped straight to a response.
//! Gate-store outages surface as 503 (fail-closed); quota denials carry the
//! window reset so clients can back off precisely.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Quota exceeded, retry in {retry_after_secs}s")]
    QuotaExceeded { retry_after_secs: u64 },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::AccessDenied(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Label used by the errors-by-class counter.
    pub fn class(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::AccessDenied(_) => "access_denied",
            ApiError::QuotaExceeded { .. } => "quota_exceeded",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::NotFound(_) => "not_found",
            ApiError::Timeout => "timeout",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ApiError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            // A timeout at the request boundary surfaces as 503.
            ApiError::Unavailable(_) | ApiError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reelscript_store::StoreError> for ApiError {
    fn from(e: reelscript_store::StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<reelscript_queue::QueueError> for ApiError {
    fn from(e: reelscript_queue::QueueError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: &'static str,
    message: String,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        crate::metrics::record_error(self.class());

        // Internal detail stays out of production responses.
        let message = match &self {
            ApiError::Internal(_) => {
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            _ => self.to_string(),
        };

        let retry_after = match &self {
            ApiError::QuotaExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = ErrorResponse {
            status: "error",
            error: self.class(),
            message,
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::QuotaExceeded { retry_after_secs } = self {
            let headers = response.headers_mut();
            if let Ok(v) = retry_after_secs.to_string().parse() {
                headers.insert("Retry-After", v);
            }
            if let Ok(v) = "0".parse() {
                headers.insert("X-RateLimit-Remaining", v);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::access_denied("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::QuotaExceeded { retry_after_secs: 9 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::unavailable("x").status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::Timeout.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_error_classes_are_stable() {
        assert_eq!(ApiError::Timeout.class(), "timeout");
        assert_eq!(ApiError::QuotaExceeded { retry_after_secs: 1 }.class(), "quota_exceeded");
    }
}
