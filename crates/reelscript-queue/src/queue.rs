//! Durable job queue using Redis Streams.
//!
//! At-least-once delivery through a consumer group, dedup on the caller's
//! job UUID, retry counters with exponential backoff, pending-claim stall
//! recovery, visibility refresh for long jobs, and a queue-wide starts-per-
//! minute limiter that shields upstream APIs independently of user quotas.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::ScriptJob;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Stream name for jobs.
    pub stream_name: String,
    /// Consumer group name.
    pub consumer_group: String,
    /// Max retries before a job is marked failed.
    pub max_retries: u32,
    /// Base delay for retry backoff (doubles each attempt).
    pub retry_base_delay: Duration,
    /// A started job whose ownership is idle longer than this is considered
    /// stalled and reclaimed.
    pub stall_timeout: Duration,
    /// Queue-wide cap on job starts per minute.
    pub starts_per_minute: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reelscript:jobs".to_string(),
            consumer_group: "reelscript:workers".to_string(),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            stall_timeout: Duration::from_secs(600),
            starts_per_minute: 10,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_base_delay: Duration::from_secs(
                std::env::var("QUEUE_RETRY_BASE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            ),
            stall_timeout: Duration::from_secs(
                std::env::var("QUEUE_STALL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            starts_per_minute: std::env::var("QUEUE_STARTS_PER_MINUTE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.starts_per_minute),
        }
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Initialize the queue (create the consumer group if missing).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a job. The job id is the dedup key: a second enqueue with the
    /// same id inside the dedup horizon is rejected.
    pub async fn enqueue(&self, job: &ScriptJob) -> QueueResult<String> {
        let mut conn = self.conn().await?;

        let payload = serde_json::to_string(job)?;
        let dedup_key = format!("reelscript:dedup:{}", job.idempotency_key());

        let exists: bool = conn.exists(&dedup_key).await?;
        if exists {
            warn!("Duplicate job rejected: {}", job.job_id);
            return Err(QueueError::duplicate(&job.job_id));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(job.idempotency_key())
            .query_async(&mut conn)
            .await?;

        // Dedup horizon: 1 hour.
        conn.set_ex::<_, _, ()>(&dedup_key, "1", 3600).await?;

        info!(job_id = %job.job_id, message_id = %message_id, "Enqueued job");
        Ok(message_id)
    }

    /// Put a job back on the stream for another delivery attempt, bypassing
    /// the dedup check (the dedup key is still held by this job id).
    pub async fn requeue(&self, job: &ScriptJob) -> QueueResult<String> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(job)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(job.idempotency_key())
            .query_async(&mut conn)
            .await?;

        info!(job_id = %job.job_id, message_id = %message_id, "Requeued job for retry");
        Ok(message_id)
    }

    /// Acknowledge a job and drop it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job message: {}", message_id);
        Ok(())
    }

    /// Clear the dedup key once a job reaches a terminal state so a later
    /// identical request can enqueue again.
    pub async fn clear_dedup(&self, job: &ScriptJob) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let dedup_key = format!("reelscript:dedup:{}", job.idempotency_key());
        conn.del::<_, ()>(&dedup_key).await?;
        Ok(())
    }

    /// Consume new jobs for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, ScriptJob)>> {
        let mut conn = self.conn().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                let message_id = entry.id.clone();
                if let Some(redis::Value::BulkString(payload)) = entry.map.get("job") {
                    let payload_str = String::from_utf8_lossy(payload);
                    match serde_json::from_str::<ScriptJob>(&payload_str) {
                        Ok(job) => {
                            debug!(job_id = %job.job_id, "Consumed job");
                            jobs.push((message_id, job));
                        }
                        Err(e) => {
                            warn!("Dropping malformed job payload: {}", e);
                            self.ack(&message_id).await.ok();
                        }
                    }
                }
            }
        }

        Ok(jobs)
    }

    /// Claim pending jobs whose ownership lapsed (stalled workers).
    pub async fn claim_stalled(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<(String, ScriptJob)>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = self.config.stall_timeout.as_millis() as u64;

        // XAUTOCLAIM transfers idle pending entries in one round trip.
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();

        // Reply shape: [next_cursor, [[id, [field, value, ...]], ...], deleted]
        if let redis::Value::Array(parts) = reply {
            if let Some(redis::Value::Array(entries)) = parts.get(1) {
                for entry in entries {
                    let (message_id, payload) = match parse_claimed_entry(entry) {
                        Some(pair) => pair,
                        None => continue,
                    };
                    match serde_json::from_str::<ScriptJob>(&payload) {
                        Ok(job) => {
                            info!(job_id = %job.job_id, "Reclaimed stalled job");
                            jobs.push((message_id, job));
                        }
                        Err(e) => {
                            warn!("Dropping malformed stalled payload: {}", e);
                            self.ack(&message_id).await.ok();
                        }
                    }
                }
            }
        }

        Ok(jobs)
    }

    /// Reset the idle timer on a message so an active long job is not
    /// reclaimed. JUSTID avoids shipping the payload back.
    pub async fn refresh_visibility(&self, consumer_name: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _res: redis::Value = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Retry count for a job id.
    pub async fn get_retry_count(&self, job_id: &str) -> QueueResult<u32> {
        let mut conn = self.conn().await?;
        let key = format!("reelscript:retry:{}", job_id);
        let count: Option<u32> = conn.get(&key).await?;
        Ok(count.unwrap_or(0))
    }

    /// Increment the retry count (24-hour TTL) and return the new value.
    pub async fn increment_retry(&self, job_id: &str) -> QueueResult<u32> {
        let mut conn = self.conn().await?;
        let key = format!("reelscript:retry:{}", job_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Backoff before retry `attempt` (1-based): base * 2^(attempt-1).
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        self.config
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Queue-wide starts-per-minute limiter, independent of per-user quotas.
    /// Returns true when this worker may start another job this minute.
    pub async fn try_acquire_start_slot(&self) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let minute = chrono::Utc::now().timestamp() / 60;
        let key = format!("reelscript:queue_rl:{}", minute);

        let started: u64 = conn.incr(&key, 1).await?;
        if started == 1 {
            conn.expire::<_, ()>(&key, 120).await?;
        }

        if started > self.config.starts_per_minute {
            debug!(started, "Queue start limit reached for this minute");
            return Ok(false);
        }
        Ok(true)
    }

    /// Depth of the job stream (queue-depth gauge).
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }
}

fn parse_claimed_entry(entry: &redis::Value) -> Option<(String, String)> {
    let redis::Value::Array(pair) = entry else {
        return None;
    };
    let message_id = match pair.first() {
        Some(redis::Value::BulkString(bytes)) => String::from_utf8(bytes.clone()).ok()?,
        _ => return None,
    };
    let redis::Value::Array(fields) = pair.get(1)? else {
        return None;
    };

    let mut i = 0;
    while i + 1 < fields.len() {
        if let (redis::Value::BulkString(field), redis::Value::BulkString(value)) =
            (&fields[i], &fields[i + 1])
        {
            if field.as_slice() == b"job".as_slice() {
                return Some((message_id, String::from_utf8(value.clone()).ok()?));
            }
        }
        i += 2;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff_doubles_from_base() {
        let queue = JobQueue::new(QueueConfig::default()).unwrap();
        assert_eq!(queue.retry_backoff(1), Duration::from_secs(2));
        assert_eq!(queue.retry_backoff(2), Duration::from_secs(4));
        assert_eq!(queue.retry_backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.starts_per_minute, 10);
        assert_eq!(config.retry_base_delay, Duration::from_secs(2));
    }
}
