//! Telemetry for the ingress and the shared runtime.
//!
//! Counters for requests, errors by class, cache traffic and feedback;
//! gauges for queue depth, active jobs, sessions, and breaker states;
//! millisecond histograms with fixed buckets for the four duration series.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Histogram buckets in milliseconds.
pub const DURATION_BUCKETS_MS: &[f64] = &[
    50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0,
];

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "reelscript_requests_total";
    pub const ERRORS_TOTAL: &str = "reelscript_errors_total";
    pub const CACHE_EVENTS_TOTAL: &str = "reelscript_cache_events_total";
    pub const FEEDBACK_TOTAL: &str = "reelscript_feedback_total";

    pub const QUEUE_DEPTH: &str = "reelscript_queue_depth";
    pub const ACTIVE_JOBS: &str = "reelscript_active_jobs";
    pub const ACTIVE_SESSIONS: &str = "reelscript_active_sessions";
    pub const BREAKER_STATE: &str = "reelscript_breaker_state";

    pub const INGRESS_DURATION_MS: &str = "reelscript_ingress_duration_ms";
    pub const JOB_DURATION_MS: &str = "reelscript_job_duration_ms";
    pub const GENERATOR_DURATION_MS: &str = "reelscript_generator_duration_ms";
    pub const ANALYSIS_DURATION_MS: &str = "reelscript_analysis_duration_ms";
}

/// Install the Prometheus recorder with the millisecond buckets applied to
/// every duration histogram.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("_duration_ms".to_string()), DURATION_BUCKETS_MS)
        .expect("duration buckets are non-empty")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

pub fn record_request(method: &str, path: &str, status: u16) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];
    counter!(names::REQUESTS_TOTAL, &labels).increment(1);
}

pub fn record_error(class: &str) {
    counter!(names::ERRORS_TOTAL, "type" => class.to_string()).increment(1);
}

/// `tier` is "tier1" or "tier2"; `hit` covers the outcome label.
pub fn record_cache_event(tier: &str, hit: bool) {
    let labels = [
        ("tier", tier.to_string()),
        ("outcome", if hit { "hit" } else { "miss" }.to_string()),
    ];
    counter!(names::CACHE_EVENTS_TOTAL, &labels).increment(1);
}

pub fn record_feedback(positive: bool) {
    let polarity = if positive { "positive" } else { "negative" };
    counter!(names::FEEDBACK_TOTAL, "polarity" => polarity.to_string()).increment(1);
}

pub fn set_queue_depth(depth: u64) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}

pub fn set_active_jobs(count: u64) {
    gauge!(names::ACTIVE_JOBS).set(count as f64);
}

pub fn set_active_sessions(count: u64) {
    gauge!(names::ACTIVE_SESSIONS).set(count as f64);
}

/// CLOSED=0, HALF_OPEN=1, OPEN=2.
pub fn set_breaker_state(service: &str, state_gauge: f64) {
    gauge!(names::BREAKER_STATE, "service" => service.to_string()).set(state_gauge);
}

pub fn record_ingress_duration(duration_ms: f64) {
    histogram!(names::INGRESS_DURATION_MS).record(duration_ms);
}

pub fn record_job_duration(duration_ms: f64) {
    histogram!(names::JOB_DURATION_MS).record(duration_ms);
}

pub fn record_generator_duration(duration_ms: f64) {
    histogram!(names::GENERATOR_DURATION_MS).record(duration_ms);
}

pub fn record_analysis_duration(duration_ms: f64) {
    histogram!(names::ANALYSIS_DURATION_MS).record(duration_ms);
}

/// Collapse high-cardinality path segments for the request counter.
fn sanitize_path(path: &str) -> String {
    use regex_lite::Regex;
    use std::sync::OnceLock;

    static VIEW: OnceLock<Regex> = OnceLock::new();
    static HASH: OnceLock<Regex> = OnceLock::new();

    let path = VIEW
        .get_or_init(|| Regex::new(r"^/s/[A-Za-z0-9_-]+$").expect("static pattern"))
        .replace(path, "/s/:public_id");
    let path = HASH
        .get_or_init(|| Regex::new(r"/[0-9a-f]{32,64}(/|$)").expect("static pattern"))
        .replace_all(&path, "/:hash$1");
    path.to_string()
}

/// Metrics middleware: request counter plus the ingress histogram.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed_ms = start.elapsed().as_millis() as f64;
    record_request(&method, &path, response.status().as_u16());
    if path.starts_with("/api/") {
        record_ingress_duration(elapsed_ms);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/s/AbCdEf12"), "/s/:public_id");
        assert_eq!(sanitize_path("/health"), "/health");
        assert_eq!(
            sanitize_path(&format!("/api/v1/script/{}", "a".repeat(64))),
            "/api/v1/script/:hash"
        );
    }

    #[test]
    fn test_bucket_layout() {
        assert_eq!(DURATION_BUCKETS_MS.len(), 10);
        assert_eq!(DURATION_BUCKETS_MS[0], 50.0);
        assert_eq!(DURATION_BUCKETS_MS[9], 60_000.0);
    }
}
