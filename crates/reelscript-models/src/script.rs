//! Generated script records and public view handles.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// URL-safe alphabet used to render public ids (6 bits per character).
const PUBLIC_ID_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn public_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{6,12}$").expect("static public id pattern"))
}

/// Short opaque handle for the public copy view.
///
/// Drawn from a 48-bit cryptographically random space and rendered as eight
/// URL-safe characters. Collisions are handled by re-drawing at insert time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicId(String);

impl PublicId {
    /// Draw a fresh random id.
    pub fn generate() -> Self {
        let bits: u64 = rand::random::<u64>() & 0xFFFF_FFFF_FFFF;
        let mut out = String::with_capacity(8);
        for i in (0..8).rev() {
            let idx = ((bits >> (i * 6)) & 0x3F) as usize;
            out.push(PUBLIC_ID_ALPHABET[idx] as char);
        }
        Self(out)
    }

    /// Validate and wrap an externally supplied id.
    pub fn parse(s: &str) -> Option<Self> {
        if public_id_pattern().is_match(s) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A generated script, keyed by request hash and public id.
///
/// Created once by the worker on success and immutable afterwards, except
/// for the feedback-scored quality fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRecord {
    /// Tier-2 cache key for the request tuple.
    pub request_hash: String,

    /// Public view handle.
    pub public_id: PublicId,

    /// Messaging-platform subscriber id.
    pub subscriber_id: String,

    /// Canonical reel URL.
    pub canonical_url: String,

    /// Idea text the script was generated for.
    pub idea: String,

    /// 0-indexed variation ordinal within the (subscriber, url, idea) family.
    pub variation_index: u32,

    /// Generated script body in `[HOOK]/[BODY]/[CTA]` layout.
    pub script_text: String,

    /// Rendered card image URLs, in carousel order.
    #[serde(default)]
    pub image_urls: Vec<String>,

    /// Public copy-view URL.
    pub view_url: String,

    /// Identifier of the generator model/prompt revision.
    pub generator_version: String,

    /// End-to-end generation duration in milliseconds.
    pub generation_ms: u64,

    /// Whether the script is a transcript reformat rather than a generation.
    #[serde(default)]
    pub is_copy_mode: bool,

    /// Feedback-derived quality score, set after the fact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,

    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_matches_contract() {
        for _ in 0..64 {
            let id = PublicId::generate();
            assert_eq!(id.as_str().len(), 8);
            assert!(PublicId::parse(id.as_str()).is_some(), "{}", id);
        }
    }

    #[test]
    fn test_parse_bounds() {
        assert!(PublicId::parse("abc_-1").is_some());
        assert!(PublicId::parse("abcdefghijkl").is_some());
        assert!(PublicId::parse("abcde").is_none(), "too short");
        assert!(PublicId::parse("abcdefghijklm").is_none(), "too long");
        assert!(PublicId::parse("abc$def").is_none(), "bad character");
        assert!(PublicId::parse("").is_none());
    }

    #[test]
    fn test_ids_are_distinct() {
        let a = PublicId::generate();
        let b = PublicId::generate();
        // 48-bit space; two consecutive draws colliding indicates a broken RNG.
        assert_ne!(a, b);
    }
}
