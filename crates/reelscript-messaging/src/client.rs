//! Messaging platform REST client.
//!
//! Writes subscriber custom fields and posts content messages. Field
//! ordering is contractual for delivery: the copy-URL field must land
//! before the image-URL field, because the platform automation reads both
//! atomically when the image-URL field changes. `deliver_artifact_fields`
//! encodes that ordering in one place.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use crate::error::{MessagingError, MessagingResult};
use crate::types::OutboundMessage;

/// Custom field the copy-view URL is written to.
pub const FIELD_COPY_URL: &str = "script_copy_url";

/// Custom field the rendered-card URL is written to. This is the trigger
/// field: writing it fires the platform-side automation.
pub const FIELD_IMAGE_URL: &str = "script_image_url";

/// Messaging client configuration.
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    pub api_base_url: String,
    pub api_key: String,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Whether to also send a direct content message after field updates.
    pub send_direct_messages: bool,
}

impl MessagingConfig {
    pub fn from_env() -> MessagingResult<Self> {
        Ok(Self {
            api_base_url: std::env::var("MESSAGING_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.manychat.com".to_string()),
            api_key: std::env::var("MESSAGING_API_KEY")
                .map_err(|_| MessagingError::config_error("MESSAGING_API_KEY not set"))?,
            timeout: Duration::from_secs(30),
            send_direct_messages: std::env::var("MESSAGING_SEND_DIRECT")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}

/// Messaging platform client.
#[derive(Clone)]
pub struct MessagingClient {
    http: Client,
    config: MessagingConfig,
}

impl MessagingClient {
    pub fn new(config: MessagingConfig) -> MessagingResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("reelscript-messaging/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> MessagingResult<Self> {
        Self::new(MessagingConfig::from_env()?)
    }

    pub fn send_direct_messages(&self) -> bool {
        self.config.send_direct_messages
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> MessagingResult<()> {
        let url = format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MessagingError::ApiRejected {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(())
    }

    /// Set a named custom field on a subscriber. Idempotent on the platform
    /// side, which is what makes at-least-once delivery acceptable.
    pub async fn set_custom_field(
        &self,
        subscriber_id: &str,
        field_name: &str,
        value: &str,
    ) -> MessagingResult<()> {
        debug!(subscriber_id, field_name, "Setting custom field");
        self.post(
            "/fb/subscriber/setCustomFieldByName",
            serde_json::json!({
                "subscriber_id": subscriber_id,
                "field_name": field_name,
                "field_value": value,
            }),
        )
        .await
    }

    /// Write the artifact fields in the contractual order: copy URL first,
    /// image URL last.
    pub async fn deliver_artifact_fields(
        &self,
        subscriber_id: &str,
        copy_url: &str,
        image_url: &str,
    ) -> MessagingResult<()> {
        self.set_custom_field(subscriber_id, FIELD_COPY_URL, copy_url).await?;
        self.set_custom_field(subscriber_id, FIELD_IMAGE_URL, image_url).await?;
        info!(subscriber_id, "Delivered artifact fields");
        Ok(())
    }

    /// Send a content message (text, image, or carousel).
    pub async fn send_message(
        &self,
        subscriber_id: &str,
        message: OutboundMessage,
    ) -> MessagingResult<()> {
        self.post(
            "/fb/sending/sendContent",
            serde_json::json!({
                "subscriber_id": subscriber_id,
                "data": {
                    "version": "v2",
                    "content": {
                        "messages": [message.to_wire()],
                    },
                },
            }),
        )
        .await
    }

    /// Convenience for plain text sends (prompts, acknowledgements).
    pub async fn send_text(&self, subscriber_id: &str, text: impl Into<String>) -> MessagingResult<()> {
        self.send_message(subscriber_id, OutboundMessage::Text(text.into())).await
    }
}
