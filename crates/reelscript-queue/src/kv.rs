//! Ephemeral key-value primitives over Redis.
//!
//! Thin typed wrappers used by sessions, counters, rate limits, and the
//! distributed breaker mirror. Every operation opens a multiplexed
//! connection and is non-blocking from the caller's perspective; a single
//! failing operation surfaces as an error the caller can choose to absorb.

use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::QueueResult;

/// Ephemeral store client.
#[derive(Clone)]
pub struct KvStore {
    client: redis::Client,
}

impl KvStore {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn from_env() -> QueueResult<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&url)
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Atomic increment. The TTL is (re)applied on the first increment of a
    /// key so a window cannot live forever.
    pub async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let value: u64 = conn.incr(key, 1).await?;
        if value == 1 {
            conn.expire::<_, ()>(key, ttl_secs as i64).await?;
        }
        Ok(value)
    }

    pub async fn get_string(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    pub async fn set_string_ex(&self, key: &str, value: &str, ttl_secs: u64) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> QueueResult<Option<T>> {
        match self.get_string(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json_ex<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> QueueResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set_string_ex(key, &raw, ttl_secs).await
    }

    pub async fn delete(&self, key: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(key).await?)
    }

    /// Remaining TTL in seconds; `None` for missing keys or keys with no
    /// expiry.
    pub async fn ttl_secs(&self, key: &str) -> QueueResult<Option<u64>> {
        let mut conn = self.conn().await?;
        let ttl: i64 = conn.ttl(key).await?;
        Ok(if ttl > 0 { Some(ttl as u64) } else { None })
    }

    /// Enumerate keys under a prefix with SCAN (non-blocking, unlike KEYS).
    pub async fn scan_prefix(&self, prefix: &str) -> QueueResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix, count = keys.len(), "Scanned key prefix");
        Ok(keys)
    }

    /// Connectivity probe for readiness checks.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
