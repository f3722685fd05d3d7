//! Reel URL canonicalization and cache key derivation.
//!
//! The canonical URL is the stable identity of a video: tracking parameters
//! and path variants must not fragment the analysis cache.

use sha2::{Digest, Sha256};

/// Version prefix baked into every tier-2 key. Extending the key tuple
/// requires bumping this so old and new keys cannot collide.
const REQUEST_KEY_VERSION: &str = "v2";

/// Hosts we accept reel URLs from.
pub const SUPPORTED_HOSTS: &[&str] = &["www.instagram.com", "instagram.com", "instagr.am"];

/// Canonicalize a reel URL.
///
/// Strips all query parameters, removes the trailing slash, and normalizes
/// the plural path segment (`/reels/` becomes `/reel/`). If the input does
/// not parse as a URL it is returned unchanged.
pub fn canonicalize_url(raw: &str) -> String {
    let mut parsed = match url::Url::parse(raw.trim()) {
        Ok(u) => u,
        Err(_) => return raw.to_string(),
    };

    parsed.set_query(None);
    parsed.set_fragment(None);

    let path = parsed.path().replace("/reels/", "/reel/");
    let path = path.trim_end_matches('/').to_string();
    parsed.set_path(&path);

    parsed.to_string()
}

/// Check whether a URL points at a supported host and a reel path.
pub fn is_supported_reel_url(raw: &str) -> bool {
    let parsed = match url::Url::parse(raw.trim()) {
        Ok(u) => u,
        Err(_) => return false,
    };

    if parsed.scheme() != "https" {
        return false;
    }

    let host_ok = parsed
        .host_str()
        .map(|h| SUPPORTED_HOSTS.contains(&h))
        .unwrap_or(false);

    let path = parsed.path();
    host_ok && (path.starts_with("/reel/") || path.starts_with("/reels/"))
}

/// Tier-1 cache key: SHA-256 of the canonical URL, hex-encoded.
///
/// Keys the reel-analysis cache, which is shared across subscribers.
pub fn reel_hash(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generation mode, part of the tier-2 key tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptMode {
    #[default]
    Full,
    HookOnly,
}

impl ScriptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptMode::Full => "full",
            ScriptMode::HookOnly => "hook_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(ScriptMode::Full),
            "hook_only" => Some(ScriptMode::HookOnly),
            _ => None,
        }
    }
}

/// Tier-2 cache key: SHA-256 over the versioned request tuple.
///
/// The idea is lowercased and trimmed so cosmetic differences do not defeat
/// the script cache. Stable across processes; the tests pin a known digest.
pub fn request_hash(
    subscriber_id: &str,
    canonical_url: &str,
    idea: &str,
    variation_index: u32,
    mode: ScriptMode,
) -> String {
    let tuple = format!(
        "{}:{}:{}:{}:{}:{}",
        REQUEST_KEY_VERSION,
        subscriber_id,
        canonical_url,
        idea.trim().to_lowercase(),
        variation_index,
        mode.as_str()
    );
    let mut hasher = Sha256::new();
    hasher.update(tuple.as_bytes());
    hex::encode(hasher.finalize())
}

/// Normalized idea form used for variation-counter keys.
pub fn normalize_idea(idea: &str) -> String {
    idea.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_strips_query_and_slash() {
        assert_eq!(
            canonicalize_url("https://www.instagram.com/reel/AbC/?utm=1"),
            "https://www.instagram.com/reel/AbC"
        );
    }

    #[test]
    fn test_canonicalize_plural_segment() {
        assert_eq!(
            canonicalize_url("https://www.instagram.com/reels/XyZ9/"),
            "https://www.instagram.com/reel/XyZ9"
        );
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let once = canonicalize_url("https://www.instagram.com/reels/AbC/?igsh=x&utm=1#frag");
        assert_eq!(canonicalize_url(&once), once);
    }

    #[test]
    fn test_canonicalize_unparseable_returns_input() {
        assert_eq!(canonicalize_url("not a url"), "not a url");
    }

    #[test]
    fn test_supported_host_required() {
        assert!(is_supported_reel_url("https://www.instagram.com/reel/AbC"));
        assert!(is_supported_reel_url("https://instagram.com/reels/AbC/"));
        // Path matches but host does not.
        assert!(!is_supported_reel_url("https://example.com/reel/AbC"));
        // Host matches but scheme is not https.
        assert!(!is_supported_reel_url("http://www.instagram.com/reel/AbC"));
        // Host matches but path is not a reel.
        assert!(!is_supported_reel_url("https://www.instagram.com/p/AbC"));
    }

    #[test]
    fn test_reel_hash_stable() {
        let h1 = reel_hash("https://www.instagram.com/reel/AbC");
        let h2 = reel_hash("https://www.instagram.com/reel/AbC");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_request_hash_normalizes_idea() {
        let a = request_hash("12345", "https://x/reel/a", "  Make It About Coding ", 0, ScriptMode::Full);
        let b = request_hash("12345", "https://x/reel/a", "make it about coding", 0, ScriptMode::Full);
        assert_eq!(a, b);
    }

    #[test]
    fn test_request_hash_varies_on_tuple_members() {
        let base = request_hash("1", "u", "i", 0, ScriptMode::Full);
        assert_ne!(base, request_hash("2", "u", "i", 0, ScriptMode::Full));
        assert_ne!(base, request_hash("1", "v", "i", 0, ScriptMode::Full));
        assert_ne!(base, request_hash("1", "u", "j", 0, ScriptMode::Full));
        assert_ne!(base, request_hash("1", "u", "i", 1, ScriptMode::Full));
        assert_ne!(base, request_hash("1", "u", "i", 0, ScriptMode::HookOnly));
    }

    #[test]
    fn test_request_hash_is_versioned() {
        // Pin the digest so the key scheme cannot silently change between
        // releases; cached scripts would become unreachable.
        let h = request_hash("12345", "https://www.instagram.com/reel/AbC", "coding", 0, ScriptMode::Full);
        assert_eq!(h, {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(b"v2:12345:https://www.instagram.com/reel/AbC:coding:0:full");
            hex::encode(hasher.finalize())
        });
    }
}
