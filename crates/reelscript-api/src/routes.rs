//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::{
    export_dataset, feedback_stats, generate, health, health_detailed, metrics_json, submit_feedback,
    view_script,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, ip_rate_limit, request_id, request_logging, request_timeout, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.ip_rate_limit_rps));

    let api_routes = Router::new()
        .route("/v1/script/generate", post(generate))
        .route("/v1/feedback", post(submit_feedback))
        .route("/v1/feedback/stats", get(feedback_stats))
        .route("/v1/dataset/export", get(export_dataset))
        .layer(middleware::from_fn_with_state(rate_limiter, ip_rate_limit))
        .layer(middleware::from_fn_with_state(
            state.config.request_timeout,
            request_timeout,
        ));

    let view_routes = Router::new().route("/s/:public_id", get(view_script));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .route("/metrics/json", get(metrics_json));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(view_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer())
        .with_state(state)
}
