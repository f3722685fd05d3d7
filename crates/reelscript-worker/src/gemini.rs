//! Gemini client for script generation and structured reel analysis.
//!
//! Two call shapes: a multimodal one-shot over extracted frames and audio,
//! and a cheaper text-only call against a cached analysis. A third call
//! asks for the structured analysis JSON that backs the tier-1 cache.

use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use reelscript_models::{Intensity, ReelAnalysis, ScriptMode, Tone};

use crate::context::PriorContext;
use crate::error::{WorkerError, WorkerResult};

/// Prompt revision; stamped with the model into `generator_version`.
const PROMPT_REVISION: &str = "v3";

/// Gemini API client.
pub struct GeminiClient {
    api_key: String,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), inline_data: None }
    }

    fn inline(mime_type: &str, data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.to_string(),
                data,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: String,
}

/// Structured analysis payload returned by the analyzer call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructuredAnalysis {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub hook_type: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub visual_cues: Vec<String>,
    #[serde(default)]
    pub scene_descriptions: Vec<String>,
}

/// Everything the prompt builder needs for one generation.
pub struct GenerationInput<'a> {
    pub idea: &'a str,
    pub mode: ScriptMode,
    pub tone: Option<Tone>,
    pub intensity: Intensity,
    pub language_hint: Option<&'a str>,
    pub prior: &'a PriorContext,
}

impl GeminiClient {
    pub fn new() -> WorkerResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| WorkerError::config_error("GEMINI_API_KEY not set"))?;
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let timeout = Duration::from_secs(
            std::env::var("GENERATOR_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        );

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reelscript-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WorkerError::config_error(format!("http client: {}", e)))?;

        Ok(Self { api_key, model, client })
    }

    /// Model id plus prompt revision, stored on every script.
    pub fn generator_version(&self) -> String {
        format!("{}/{}", self.model, PROMPT_REVISION)
    }

    async fn call(
        &self,
        service: &'static str,
        request: &GeminiRequest,
    ) -> WorkerResult<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| WorkerError::upstream(service, e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let detail = response.text().await.unwrap_or_default();
            return Err(WorkerError::permanent(service, format!("auth rejected: {}", detail)));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(WorkerError::upstream(
                service,
                format!("status {}: {}", status, detail),
            ));
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::upstream(service, format!("bad response: {}", e)))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| WorkerError::upstream(service, "empty candidate list"))
    }

    async fn media_parts(
        frames: &[std::path::PathBuf],
        audio: Option<&Path>,
    ) -> WorkerResult<Vec<Part>> {
        let mut parts = Vec::new();
        for frame in frames {
            let bytes = tokio::fs::read(frame).await?;
            parts.push(Part::inline("image/jpeg", BASE64.encode(bytes)));
        }
        if let Some(audio_path) = audio {
            let bytes = tokio::fs::read(audio_path).await?;
            parts.push(Part::inline("audio/wav", BASE64.encode(bytes)));
        }
        Ok(parts)
    }

    /// Multimodal one-shot: frames + audio + the full instruction, one call.
    pub async fn generate_script_multimodal(
        &self,
        frames: &[std::path::PathBuf],
        audio: Option<&Path>,
        input: &GenerationInput<'_>,
    ) -> WorkerResult<String> {
        let mut parts = Self::media_parts(frames, audio).await?;
        parts.push(Part::text(build_script_prompt(input, None)));

        info!(
            frames = frames.len(),
            audio = audio.is_some(),
            "Calling generator (multimodal one-shot)"
        );
        let request = GeminiRequest {
            contents: vec![Content { parts }],
            generation_config: None,
        };
        self.call("generation", &request).await
    }

    /// Text-only generation against a cached analysis.
    pub async fn generate_script_text(
        &self,
        analysis: &ReelAnalysis,
        input: &GenerationInput<'_>,
    ) -> WorkerResult<String> {
        debug!("Calling generator (text-only with cached analysis)");
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part::text(build_script_prompt(input, Some(analysis)))],
            }],
            generation_config: None,
        };
        self.call("generation", &request).await
    }

    /// Structured analysis of the reel; JSON response, backs the tier-1
    /// cache.
    pub async fn analyze_structured(
        &self,
        frames: &[std::path::PathBuf],
        audio: Option<&Path>,
    ) -> WorkerResult<StructuredAnalysis> {
        let mut parts = Self::media_parts(frames, audio).await?;
        parts.push(Part::text(ANALYSIS_PROMPT));

        let request = GeminiRequest {
            contents: vec![Content { parts }],
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json".to_string(),
            }),
        };

        let raw = self.call("analysis", &request).await?;
        serde_json::from_str(&raw)
            .map_err(|e| WorkerError::upstream("analysis", format!("bad analysis JSON: {}", e)))
    }
}

const ANALYSIS_PROMPT: &str = "Analyze this short-form video. Return JSON with keys: \
transcript (spoken words, or null), tone, hook_type (question|bold_claim|pattern_interrupt|story), \
content_type (talking_head|tutorial|skit|montage), visual_cues (array of on-screen text and props), \
scene_descriptions (array, one per scene).";

/// Assemble the generation instruction. Prompt authoring itself is the
/// collaborator's concern; this only wires the request facts together.
fn build_script_prompt(input: &GenerationInput<'_>, analysis: Option<&ReelAnalysis>) -> String {
    let mut prompt = String::new();

    prompt.push_str("Write a short-form speaking script in the exact layout:\n[HOOK]\n...\n\n[BODY]\n...\n\n[CTA]\n...\n\n");
    if input.mode == ScriptMode::HookOnly {
        prompt.push_str("Only the [HOOK] section is needed; leave body and CTA out.\n");
    }

    prompt.push_str(&format!("The creator's idea: {}\n", input.idea));
    if let Some(tone) = input.tone {
        prompt.push_str(&format!("Tone: {}\n", tone.as_str()));
    }
    match input.intensity {
        Intensity::Lite => prompt.push_str("Keep it short: under 30 seconds of speaking.\n"),
        Intensity::Medium => {}
        Intensity::Deep => prompt.push_str("Go deeper than usual: 60-90 seconds of speaking.\n"),
    }
    if let Some(lang) = input.language_hint {
        prompt.push_str(&format!("Write the script in {}.\n", lang));
    }

    if let Some(a) = analysis {
        prompt.push_str("\nThe reference video, previously analyzed:\n");
        if let Some(ref transcript) = a.transcript {
            prompt.push_str(&format!("Transcript: {}\n", transcript));
        }
        if let Some(ref hook_type) = a.hook_type {
            prompt.push_str(&format!("Hook type: {}\n", hook_type));
        }
        if !a.scene_descriptions.is_empty() {
            prompt.push_str(&format!("Scenes: {}\n", a.scene_descriptions.join("; ")));
        }
        if !a.visual_cues.is_empty() {
            prompt.push_str(&format!("On-screen: {}\n", a.visual_cues.join("; ")));
        }
    } else {
        prompt.push_str("\nThe attached frames and audio are the reference video; mirror its structure and pacing.\n");
    }

    if !input.prior.same_idea_summaries.is_empty() {
        prompt.push_str("\nEarlier versions for this same idea opened with:\n");
        for summary in &input.prior.same_idea_summaries {
            prompt.push_str(&format!("- {}\n", summary));
        }
        prompt.push_str("Do not repeat these angles.\n");
    }
    if !input.prior.style_bodies.is_empty() {
        prompt.push_str("\nStyle reference from this creator's other scripts:\n");
        for body in &input.prior.style_bodies {
            prompt.push_str(&format!("---\n{}\n", body));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PriorContext;

    fn input<'a>(prior: &'a PriorContext) -> GenerationInput<'a> {
        GenerationInput {
            idea: "morning routines",
            mode: ScriptMode::Full,
            tone: Some(Tone::Funny),
            intensity: Intensity::Lite,
            language_hint: None,
            prior,
        }
    }

    #[test]
    fn test_prompt_carries_request_facts() {
        let prior = PriorContext::default();
        let prompt = build_script_prompt(&input(&prior), None);
        assert!(prompt.contains("morning routines"));
        assert!(prompt.contains("Tone: funny"));
        assert!(prompt.contains("under 30 seconds"));
        assert!(prompt.contains("[HOOK]"));
    }

    #[test]
    fn test_prompt_steers_away_from_prior_hooks() {
        let prior = PriorContext {
            same_idea_summaries: vec!["Stop doing this every morning".to_string()],
            style_bodies: vec![],
        };
        let prompt = build_script_prompt(&input(&prior), None);
        assert!(prompt.contains("Do not repeat these angles"));
        assert!(prompt.contains("Stop doing this every morning"));
    }

    #[test]
    fn test_hook_only_mode_trims_scope() {
        let prior = PriorContext::default();
        let mut i = input(&prior);
        i.mode = ScriptMode::HookOnly;
        let prompt = build_script_prompt(&i, None);
        assert!(prompt.contains("Only the [HOOK] section"));
    }

    #[test]
    fn test_structured_analysis_parses_partial_json() {
        let raw = r#"{"transcript": "hello", "hook_type": "question", "visual_cues": ["caption"]}"#;
        let parsed: StructuredAnalysis = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.transcript.as_deref(), Some("hello"));
        assert_eq!(parsed.hook_type.as_deref(), Some("question"));
        assert!(parsed.content_type.is_none());
        assert_eq!(parsed.visual_cues.len(), 1);
    }
}
