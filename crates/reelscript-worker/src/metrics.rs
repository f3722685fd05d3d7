//! Worker-side metric recording.
//!
//! Names are shared with the API process so dashboards aggregate across
//! both exporters.

use metrics::{counter, histogram};

pub mod names {
    pub const ERRORS_TOTAL: &str = "reelscript_errors_total";
    pub const CACHE_EVENTS_TOTAL: &str = "reelscript_cache_events_total";
    pub const JOB_DURATION_MS: &str = "reelscript_job_duration_ms";
    pub const GENERATOR_DURATION_MS: &str = "reelscript_generator_duration_ms";
    pub const ANALYSIS_DURATION_MS: &str = "reelscript_analysis_duration_ms";
}

pub fn record_error(class: &str) {
    counter!(names::ERRORS_TOTAL, "type" => class.to_string()).increment(1);
}

pub fn record_cache_event(tier: &str, hit: bool) {
    let labels = [
        ("tier", tier.to_string()),
        ("outcome", if hit { "hit" } else { "miss" }.to_string()),
    ];
    counter!(names::CACHE_EVENTS_TOTAL, &labels).increment(1);
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
