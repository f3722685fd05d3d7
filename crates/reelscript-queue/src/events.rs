//! Queue lifecycle events via Redis Pub/Sub.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::QueueResult;

/// Channel all queue events are published on.
const EVENTS_CHANNEL: &str = "reelscript:queue_events";

/// Observable queue event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    Progress {
        job_id: String,
        stage: String,
    },
    Completed {
        job_id: String,
        script_public_id: String,
        duration_ms: u64,
    },
    Failed {
        job_id: String,
        error_class: String,
        attempts: u32,
    },
    Stalled {
        job_id: String,
        reclaimed_by: String,
    },
}

impl QueueEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::Progress { .. } => "progress",
            QueueEvent::Completed { .. } => "completed",
            QueueEvent::Failed { .. } => "failed",
            QueueEvent::Stalled { .. } => "stalled",
        }
    }
}

/// Publisher/subscriber for queue events.
pub struct EventChannel {
    client: redis::Client,
}

impl EventChannel {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Publish an event. Best-effort at call sites: event loss must never
    /// fail a job.
    pub async fn publish(&self, event: &QueueEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;
        debug!(kind = event.kind(), "Publishing queue event");
        conn.publish::<_, _, ()>(EVENTS_CHANNEL, payload).await?;
        Ok(())
    }

    /// Subscribe to the event stream.
    pub async fn subscribe(
        &self,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = QueueEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(EVENTS_CHANNEL).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_round_trip() {
        let event = QueueEvent::Failed {
            job_id: "j1".to_string(),
            error_class: "timeout".to_string(),
            attempts: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"failed\""));
        let back: QueueEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "failed");
    }
}
