//! Per-subscriber quota windows and short-term block flags.
//!
//! Quota counters live under `user_rl:<subscriber>` with the window TTL.
//! The gate that consumes these fails closed: a store error here must deny
//! the request, so errors propagate instead of degrading to "allowed".

use serde::{Deserialize, Serialize};

use crate::error::QueueResult;
use crate::kv::KvStore;

/// Default per-subscriber ceiling (requests per window).
pub const DEFAULT_USER_LIMIT: u64 = 10;

/// Default quota window in seconds (1 hour).
pub const DEFAULT_WINDOW_SECS: u64 = 3600;

/// Default block flag TTL in seconds (24 hours).
pub const DEFAULT_BLOCK_TTL_SECS: u64 = 24 * 3600;

/// Outcome of a quota check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Requests left in the window after this one.
    pub remaining: u64,
    /// Seconds until the window resets.
    pub reset_secs: u64,
}

/// Per-subscriber quota gate over fixed windows.
#[derive(Clone)]
pub struct QuotaStore {
    kv: KvStore,
}

impl QuotaStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    fn quota_key(subscriber_id: &str) -> String {
        format!("user_rl:{}", subscriber_id)
    }

    fn block_key(subscriber_id: &str) -> String {
        format!("blocked:{}", subscriber_id)
    }

    /// Count this request against the subscriber's window and decide.
    ///
    /// Errors propagate: the caller maps them to a 503 (fail-closed).
    pub async fn check_and_count(
        &self,
        subscriber_id: &str,
        limit: u64,
        window_secs: u64,
    ) -> QueueResult<QuotaDecision> {
        let key = Self::quota_key(subscriber_id);
        let used = self.kv.incr_with_ttl(&key, window_secs).await?;
        let reset_secs = self.kv.ttl_secs(&key).await?.unwrap_or(window_secs);

        Ok(QuotaDecision {
            allowed: used <= limit,
            remaining: limit.saturating_sub(used),
            reset_secs,
        })
    }

    /// Remaining quota without consuming any.
    pub async fn peek(&self, subscriber_id: &str, limit: u64) -> QueueResult<u64> {
        let key = Self::quota_key(subscriber_id);
        let used: u64 = self
            .kv
            .get_string(&key)
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(limit.saturating_sub(used))
    }

    /// Set the short-term block flag.
    pub async fn block(&self, subscriber_id: &str, ttl_secs: u64) -> QueueResult<()> {
        self.kv
            .set_string_ex(&Self::block_key(subscriber_id), "1", ttl_secs)
            .await
    }

    pub async fn unblock(&self, subscriber_id: &str) -> QueueResult<()> {
        self.kv.delete(&Self::block_key(subscriber_id)).await
    }

    /// Check the ephemeral block flag. Errors propagate so the gate can
    /// fail closed.
    pub async fn is_blocked(&self, subscriber_id: &str) -> QueueResult<bool> {
        self.kv.exists(&Self::block_key(subscriber_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefixes_match_layout() {
        assert_eq!(QuotaStore::quota_key("42"), "user_rl:42");
        assert_eq!(QuotaStore::block_key("42"), "blocked:42");
    }
}
