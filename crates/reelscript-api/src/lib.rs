//! Axum HTTP ingress for the reelscript backend.
//!
//! This crate provides:
//! - The generation ingress (validation, access gate, intent branching,
//!   tier-2 cache, enqueue)
//! - The public copy view
//! - Feedback ingest and admin/observability endpoints
//! - Per-IP rate limiting, security headers, Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::{ApiConfig, ConfigError};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
