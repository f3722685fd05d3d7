//! Session and variation-counter storage.
//!
//! Sessions live under `session:<subscriber>` with a 30-minute sliding TTL.
//! Variation counters live under `variation:<subscriber>:<url>:<idea>` with
//! a 7-day TTL and atomic increments; the counter is the only source of
//! truth for ordering within a (subscriber, url, idea) family.

use tracing::debug;

use reelscript_models::{
    normalize_idea, SessionContext, SESSION_TTL_SECS, VARIATION_TTL_SECS,
};

use crate::error::QueueResult;
use crate::kv::KvStore;

/// Advisory threshold: variations beyond this get a gentle note in the
/// acknowledgement. Never blocks.
pub const DEFAULT_SOFT_VARIATION_LIMIT: u32 = 5;

/// Store for sessions and variation counters.
#[derive(Clone)]
pub struct SessionStore {
    kv: KvStore,
}

impl SessionStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    fn session_key(subscriber_id: &str) -> String {
        format!("session:{}", subscriber_id)
    }

    fn variation_key(subscriber_id: &str, canonical_url: &str, idea: &str) -> String {
        format!("variation:{}:{}:{}", subscriber_id, canonical_url, normalize_idea(idea))
    }

    /// Load the subscriber's session, or a fresh one if none is live.
    pub async fn load_or_fresh(&self, subscriber_id: &str) -> QueueResult<SessionContext> {
        let key = Self::session_key(subscriber_id);
        match self.kv.get_json::<SessionContext>(&key).await? {
            Some(session) => Ok(session),
            None => {
                debug!(subscriber_id, "No live session, starting fresh");
                Ok(SessionContext::fresh(subscriber_id))
            }
        }
    }

    /// Persist the session, refreshing the sliding TTL.
    pub async fn save(&self, session: &SessionContext) -> QueueResult<()> {
        let key = Self::session_key(&session.subscriber_id);
        self.kv.set_json_ex(&key, session, SESSION_TTL_SECS).await
    }

    pub async fn clear(&self, subscriber_id: &str) -> QueueResult<()> {
        self.kv.delete(&Self::session_key(subscriber_id)).await
    }

    /// Atomically increment the variation counter and return the 0-indexed
    /// variation index (post-increment value minus one).
    pub async fn get_and_increment_variation(
        &self,
        subscriber_id: &str,
        canonical_url: &str,
        idea: &str,
    ) -> QueueResult<u32> {
        let key = Self::variation_key(subscriber_id, canonical_url, idea);
        let value = self.kv.incr_with_ttl(&key, VARIATION_TTL_SECS).await?;
        Ok((value - 1) as u32)
    }

    /// Current 0-indexed variation for the family, without consuming one.
    /// `None` when no generation has happened yet. Used when an identical
    /// request is re-submitted: repeats reuse the last index so the script
    /// cache and in-flight dedup can do their job; only a redo advances it.
    pub async fn current_variation(
        &self,
        subscriber_id: &str,
        canonical_url: &str,
        idea: &str,
    ) -> QueueResult<Option<u32>> {
        let key = Self::variation_key(subscriber_id, canonical_url, idea);
        let value: Option<u64> = self
            .kv
            .get_string(&key)
            .await?
            .and_then(|s| s.parse().ok());
        Ok(value.filter(|v| *v > 0).map(|v| (v - 1) as u32))
    }

    /// Live session count for the active-sessions gauge.
    pub async fn count_active(&self) -> QueueResult<u64> {
        Ok(self.kv.scan_prefix("session:").await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variation_key_normalizes_idea() {
        let a = SessionStore::variation_key("1", "https://x/reel/a", "  My Idea ");
        let b = SessionStore::variation_key("1", "https://x/reel/a", "my idea");
        assert_eq!(a, b);
        assert!(a.starts_with("variation:1:"));
    }

    #[test]
    fn test_session_key_prefix() {
        assert_eq!(SessionStore::session_key("42"), "session:42");
    }
}
