//! Append-only dataset records written once per completed generation.
//!
//! The warehouse-side schema is an external concern; this is the write
//! contract only. Feedback events are tagged with a schema version so
//! readers can dispatch on the discriminator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::ScriptMode;

/// Per-section star feedback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionFeedback {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cta: Option<u8>,
}

/// Downstream performance of the video the script was used for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoPerformance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<u64>,
}

/// Feedback event, versioned by a `schema_version` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "schema_version")]
pub enum FeedbackEvent {
    /// Original thumbs/rating-only shape.
    #[serde(rename = "1")]
    V1 {
        #[serde(skip_serializing_if = "Option::is_none")]
        rating: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        feedback_text: Option<String>,
        recorded_at: DateTime<Utc>,
    },
    /// Adds per-section ratings and downstream video performance.
    #[serde(rename = "2")]
    V2 {
        #[serde(skip_serializing_if = "Option::is_none")]
        overall_rating: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        section_feedback: Option<SectionFeedback>,
        #[serde(skip_serializing_if = "Option::is_none")]
        feedback_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        video_performance: Option<VideoPerformance>,
        recorded_at: DateTime<Utc>,
    },
}

impl FeedbackEvent {
    /// Overall rating regardless of schema version.
    pub fn rating(&self) -> Option<u8> {
        match self {
            FeedbackEvent::V1 { rating, .. } => *rating,
            FeedbackEvent::V2 { overall_rating, .. } => *overall_rating,
        }
    }
}

/// Cheap features derived from the generated script at write time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedFeatures {
    pub word_count: u32,
    pub sentence_count: u32,
    pub hook_word_count: u32,
}

impl DerivedFeatures {
    pub fn from_script(script_text: &str, hook: &str) -> Self {
        let words = |s: &str| s.split_whitespace().count() as u32;
        let sentences = script_text
            .chars()
            .filter(|c| matches!(c, '.' | '!' | '?'))
            .count()
            .max(1) as u32;
        Self {
            word_count: words(script_text),
            sentence_count: sentences,
            hook_word_count: words(hook),
        }
    }
}

/// One row per completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Equal to the script's request hash; one record per generation.
    pub request_hash: String,

    pub subscriber_id: String,
    pub canonical_url: String,
    pub idea: String,
    pub variation_index: u32,
    pub mode: ScriptMode,

    pub script_text: String,
    pub generator_version: String,
    pub generation_ms: u64,
    pub tier1_cache_hit: bool,
    pub is_copy_mode: bool,

    /// Active experiment identifiers at generation time.
    #[serde(default)]
    pub experiment_ids: Vec<String>,

    #[serde(default)]
    pub derived: DerivedFeatures,

    /// Explicit and implicit feedback, appended after the fact.
    #[serde(default)]
    pub feedback: Vec<FeedbackEvent>,

    /// Set once an operator has reviewed the record for training use.
    #[serde(default)]
    pub validated: bool,

    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_round_trips_through_tag() {
        let event = FeedbackEvent::V2 {
            overall_rating: Some(4),
            section_feedback: Some(SectionFeedback {
                hook: Some(5),
                body: None,
                cta: Some(3),
            }),
            feedback_text: Some("solid".to_string()),
            video_performance: None,
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["schema_version"], "2");

        let back: FeedbackEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.rating(), Some(4));
    }

    #[test]
    fn test_v1_reader_dispatch() {
        let json = serde_json::json!({
            "schema_version": "1",
            "rating": 5,
            "recorded_at": Utc::now(),
        });
        let event: FeedbackEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(event, FeedbackEvent::V1 { .. }));
        assert_eq!(event.rating(), Some(5));
    }

    #[test]
    fn test_derived_features() {
        let d = DerivedFeatures::from_script("One two three. Four five!", "One two three.");
        assert_eq!(d.word_count, 5);
        assert_eq!(d.sentence_count, 2);
        assert_eq!(d.hook_word_count, 3);
    }
}
