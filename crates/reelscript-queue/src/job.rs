//! Queue job payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reelscript_models::{Intensity, ScriptMode, Tone};

/// A script generation job as carried on the queue stream.
///
/// `job_id` doubles as the queue-level idempotency key; the ingress also
/// checks the durable store for an active job on the same request hash
/// before enqueueing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptJob {
    /// Caller-supplied UUID; dedup key at the queue level.
    pub job_id: String,

    pub subscriber_id: String,

    /// Tier-2 key for the full request tuple.
    pub request_hash: String,

    /// Tier-1 key for the canonical URL.
    pub reel_hash: String,

    pub canonical_url: String,
    pub idea: String,
    pub variation_index: u32,

    #[serde(default)]
    pub mode: ScriptMode,

    /// Emit the transcript as the script instead of generating one.
    #[serde(default)]
    pub is_copy_mode: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,

    #[serde(default)]
    pub intensity: Intensity,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,

    pub enqueued_at: DateTime<Utc>,
}

impl ScriptJob {
    pub fn new(
        subscriber_id: impl Into<String>,
        request_hash: impl Into<String>,
        reel_hash: impl Into<String>,
        canonical_url: impl Into<String>,
        idea: impl Into<String>,
        variation_index: u32,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            subscriber_id: subscriber_id.into(),
            request_hash: request_hash.into(),
            reel_hash: reel_hash.into(),
            canonical_url: canonical_url.into(),
            idea: idea.into(),
            variation_index,
            mode: ScriptMode::default(),
            is_copy_mode: false,
            tone: None,
            intensity: Intensity::default(),
            language_hint: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Queue-level dedup key.
    pub fn idempotency_key(&self) -> &str {
        &self.job_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_serde_round_trip() {
        let job = ScriptJob::new("12345", "rh", "th", "https://www.instagram.com/reel/AbC", "idea", 2);
        let json = serde_json::to_string(&job).unwrap();
        let back: ScriptJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_id, job.job_id);
        assert_eq!(back.variation_index, 2);
        assert_eq!(back.mode, ScriptMode::Full);
        assert!(!back.is_copy_mode);
    }

    #[test]
    fn test_idempotency_key_is_job_id() {
        let job = ScriptJob::new("1", "rh", "th", "u", "i", 0);
        assert_eq!(job.idempotency_key(), job.job_id);
    }
}
