//! Card render adapter.
//!
//! The raster engine is an external collaborator reached over HTTP: it
//! receives the script sections and returns one PNG per card. The worker
//! only moves bytes; layout and typography live in the render service.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use reelscript_models::ScriptSections;

use crate::error::{WorkerError, WorkerResult};

/// Render adapter configuration.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub service_url: String,
    pub timeout: Duration,
}

impl RenderConfig {
    pub fn from_env() -> WorkerResult<Self> {
        Ok(Self {
            service_url: std::env::var("RENDER_SERVICE_URL")
                .map_err(|_| WorkerError::config_error("RENDER_SERVICE_URL not set"))?,
            timeout: Duration::from_secs(30),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    /// Base64-encoded PNGs, one per card, in carousel order.
    images: Vec<String>,
}

/// HTTP client for the card render service.
pub struct CardRenderer {
    http: Client,
    config: RenderConfig,
}

impl CardRenderer {
    pub fn new(config: RenderConfig) -> WorkerResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("reelscript-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WorkerError::config_error(format!("http client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> WorkerResult<Self> {
        Self::new(RenderConfig::from_env()?)
    }

    /// Render the sections into card PNGs.
    pub async fn render_cards(&self, sections: &ScriptSections) -> WorkerResult<Vec<Vec<u8>>> {
        let url = format!("{}/render", self.config.service_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "hook": sections.hook,
                "body": sections.body,
                "cta": sections.cta,
            }))
            .send()
            .await
            .map_err(|e| WorkerError::upstream("upload", format!("render: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(WorkerError::upstream(
                "upload",
                format!("render status {}: {}", status, detail),
            ));
        }

        let parsed: RenderResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::upstream("upload", format!("render response: {}", e)))?;

        let mut images = Vec::with_capacity(parsed.images.len());
        for encoded in parsed.images {
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| WorkerError::upstream("upload", format!("render payload: {}", e)))?;
            images.push(bytes);
        }

        if images.is_empty() {
            return Err(WorkerError::upstream("upload", "render produced no cards"));
        }

        info!(cards = images.len(), "Rendered script cards");
        Ok(images)
    }
}
