//! Reel analysis cache records (tier-1).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default analysis lifetime before a fresh download is required.
pub const ANALYSIS_TTL_DAYS: i64 = 7;

/// How the analyzer consumed the source video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    Audio,
    Frames,
    #[default]
    Hybrid,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Audio => "audio",
            AnalysisMode::Frames => "frames",
            AnalysisMode::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(AnalysisMode::Audio),
            "frames" => Some(AnalysisMode::Frames),
            "hybrid" => Some(AnalysisMode::Hybrid),
            _ => None,
        }
    }
}

/// Structured analysis of one reel, shared across subscribers.
///
/// Written by the worker after a successful analysis pass; a later pass may
/// overwrite the record with richer data (e.g. an extracted transcript).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReelAnalysis {
    /// Tier-1 cache key (SHA-256 of the canonical URL).
    pub reel_hash: String,

    pub canonical_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,

    /// Hook taxonomy label ("question", "bold_claim", "pattern_interrupt", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_type: Option<String>,

    /// Broad content classification ("talking_head", "tutorial", "skit", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default)]
    pub visual_cues: Vec<String>,

    #[serde(default)]
    pub scene_descriptions: Vec<String>,

    /// Durable copy of the source video, when one was uploaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,

    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ReelAnalysis {
    pub fn new(reel_hash: impl Into<String>, canonical_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            reel_hash: reel_hash.into(),
            canonical_url: canonical_url.into(),
            transcript: None,
            tone: None,
            hook_type: None,
            content_type: None,
            visual_cues: Vec::new(),
            scene_descriptions: Vec::new(),
            video_url: None,
            expires_at: now + Duration::days(ANALYSIS_TTL_DAYS),
            created_at: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Whether a candidate record carries strictly more signal than this one.
    /// Used to decide if a later pass should overwrite the cache entry.
    pub fn is_enriched_by(&self, other: &ReelAnalysis) -> bool {
        (self.transcript.is_none() && other.transcript.is_some())
            || (self.video_url.is_none() && other.video_url.is_some())
            || other.scene_descriptions.len() > self.scene_descriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_analysis_not_expired() {
        let a = ReelAnalysis::new("hash", "https://www.instagram.com/reel/AbC");
        assert!(!a.is_expired());
    }

    #[test]
    fn test_enrichment_by_transcript() {
        let base = ReelAnalysis::new("h", "u");
        let mut richer = ReelAnalysis::new("h", "u");
        richer.transcript = Some("hello".to_string());
        assert!(base.is_enriched_by(&richer));
        assert!(!richer.is_enriched_by(&base));
    }
}
