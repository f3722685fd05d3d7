//! Health and observability endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// GET /health (liveness).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(latency_ms: u64) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            latency_ms: Some(latency_ms),
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Serialize)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub redis: CheckStatus,
    pub store: CheckStatus,
    pub storage: CheckStatus,
    pub queue_depth: Option<u64>,
    pub breakers: Vec<BreakerStatus>,
}

#[derive(Serialize)]
pub struct BreakerStatus {
    pub service: String,
    pub state: String,
}

/// GET /health/detailed (dependency checks with latencies).
/// Checks connectivity to Redis, the document store, and R2.
pub async fn health_detailed(
    State(state): State<AppState>,
) -> Result<Json<DetailedHealthResponse>, (StatusCode, Json<DetailedHealthResponse>)> {
    use std::time::Instant;

    let redis = {
        let start = Instant::now();
        match state.kv.ping().await {
            Ok(_) => CheckStatus::ok(start.elapsed().as_millis() as u64),
            Err(e) => CheckStatus::error(e.to_string()),
        }
    };

    let store = {
        let start = Instant::now();
        match state.users.get("0").await {
            Ok(_) => CheckStatus::ok(start.elapsed().as_millis() as u64),
            Err(e) => CheckStatus::error(e.to_string()),
        }
    };

    let storage = {
        let start = Instant::now();
        match state.storage.ping().await {
            Ok(_) => CheckStatus::ok(start.elapsed().as_millis() as u64),
            Err(e) => CheckStatus::error(e.to_string()),
        }
    };

    let queue_depth = state.queue.len().await.ok();

    let breakers = state
        .breakers
        .states()
        .into_iter()
        .map(|(service, breaker_state)| BreakerStatus {
            service,
            state: breaker_state.as_str().to_string(),
        })
        .collect();

    let healthy = redis.is_ok() && store.is_ok() && storage.is_ok();
    let response = DetailedHealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        redis,
        store,
        storage,
        queue_depth,
        breakers,
    };

    if healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

#[derive(Serialize)]
pub struct MetricsDebugResponse {
    pub uptime_secs: u64,
    pub queue_depth: Option<u64>,
    pub active_jobs: Option<u64>,
    pub active_sessions: Option<u64>,
    pub breakers: Vec<BreakerStatus>,
}

/// GET /metrics/json (debug snapshot of the live gauges).
pub async fn metrics_json(State(state): State<AppState>) -> Json<MetricsDebugResponse> {
    let queue_depth = state.queue.len().await.ok();
    let active_jobs = state.jobs.count_processing().await.ok();
    let active_sessions = state.sessions.count_active().await.ok();

    let breakers = state
        .breakers
        .states()
        .into_iter()
        .map(|(service, breaker_state)| BreakerStatus {
            service,
            state: breaker_state.as_str().to_string(),
        })
        .collect();

    Json(MetricsDebugResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        queue_depth,
        active_jobs,
        active_sessions,
        breakers,
    })
}
