//! Per-subscriber conversational session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sliding session lifetime in seconds (30 minutes).
pub const SESSION_TTL_SECS: u64 = 30 * 60;

/// Variation counter lifetime in seconds (7 days).
pub const VARIATION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Conversational position of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingIdea,
    AwaitingConfirm,
    Processing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingIdea => "awaiting_idea",
            SessionState::AwaitingConfirm => "awaiting_confirm",
            SessionState::Processing => "processing",
        }
    }
}

/// Short-lived conversational memory, keyed by subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub subscriber_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_idea: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_request_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_script_id: Option<String>,

    #[serde(default)]
    pub variation_count: u32,

    #[serde(default)]
    pub state: SessionState,

    pub last_activity: DateTime<Utc>,

    /// At most one in-flight job per session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_job_id: Option<String>,
}

impl SessionContext {
    pub fn fresh(subscriber_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            last_url: None,
            last_idea: None,
            last_request_hash: None,
            last_script_id: None,
            variation_count: 0,
            state: SessionState::Idle,
            last_activity: Utc::now(),
            active_job_id: None,
        }
    }

    /// A new URL was observed: remember it, expect an idea next, and reset
    /// the in-memory variation count for the new reel.
    pub fn observe_url(&mut self, canonical_url: impl Into<String>) {
        self.last_url = Some(canonical_url.into());
        self.state = SessionState::AwaitingIdea;
        self.variation_count = 0;
        self.touch();
    }

    /// An idea was observed. Returns true when it repeats the previous idea
    /// for the same URL (case-insensitive, trimmed), i.e. the same variation
    /// family continues.
    pub fn observe_idea(&mut self, idea: &str) -> bool {
        let same_family = self
            .last_idea
            .as_deref()
            .map(|prev| prev.trim().eq_ignore_ascii_case(idea.trim()))
            .unwrap_or(false);
        if !same_family {
            self.variation_count = 0;
        }
        self.last_idea = Some(idea.to_string());
        self.touch();
        same_family
    }

    /// A generation finished: remember what was produced.
    pub fn observe_result(&mut self, request_hash: impl Into<String>, script_id: impl Into<String>) {
        self.last_request_hash = Some(request_hash.into());
        self.last_script_id = Some(script_id.into());
        self.state = SessionState::AwaitingConfirm;
        self.active_job_id = None;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_resets_variation_count() {
        let mut s = SessionContext::fresh("123");
        s.variation_count = 4;
        s.observe_url("https://www.instagram.com/reel/AbC");
        assert_eq!(s.variation_count, 0);
        assert_eq!(s.state, SessionState::AwaitingIdea);
    }

    #[test]
    fn test_idea_family_detection() {
        let mut s = SessionContext::fresh("123");
        assert!(!s.observe_idea("Make it about coding"));
        assert!(s.observe_idea("  make it about CODING "));
        assert!(!s.observe_idea("make it about cooking"));
    }

    #[test]
    fn test_result_clears_active_job() {
        let mut s = SessionContext::fresh("123");
        s.active_job_id = Some("job-1".to_string());
        s.observe_result("hash", "script");
        assert_eq!(s.state, SessionState::AwaitingConfirm);
        assert!(s.active_job_id.is_none());
    }
}
