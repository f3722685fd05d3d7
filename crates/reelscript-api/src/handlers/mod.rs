//! Request handlers.

pub mod dataset;
pub mod feedback;
pub mod generate;
pub mod health;
pub mod view;

pub use dataset::export_dataset;
pub use feedback::{feedback_stats, submit_feedback};
pub use generate::generate;
pub use health::{health, health_detailed, metrics_json};
pub use view::view_script;

use axum::http::HeaderMap;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// Admin endpoints require the fixed API key header.
pub fn require_admin(headers: &HeaderMap, config: &ApiConfig) -> ApiResult<()> {
    let provided = headers
        .get("X-Admin-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided.is_empty() || provided != config.admin_api_key {
        return Err(ApiError::access_denied("admin key required"));
    }
    Ok(())
}
