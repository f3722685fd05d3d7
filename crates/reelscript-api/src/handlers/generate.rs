//! Script-generation ingress.
//!
//! Validates the payload, runs the access gate, classifies intent, resolves
//! the (url, idea, variation) triple against the session, consults the
//! tier-2 cache, and either answers inline or enqueues a job. The handler
//! never waits for a worker.

use std::sync::OnceLock;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reelscript_breaker::services as breaker_services;
use reelscript_models::{
    canonicalize_url, is_supported_reel_url, parse_with_url, reel_hash, request_hash, IntentType,
    JobRecord, ParsedIntent, ScriptMode, SessionContext, SessionState, Tone,
};
use reelscript_queue::ScriptJob;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::{default_idea, AccessGate, GateOutcome};
use crate::state::AppState;

/// Generation request payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub subscriber_id: String,
    #[serde(default)]
    pub reel_url: Option<String>,
    #[serde(default)]
    pub user_idea: Option<String>,
    #[serde(default)]
    pub tone_hint: Option<String>,
    #[serde(default)]
    pub language_hint: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(rename = "scriptUrl", skip_serializing_if = "Option::is_none")]
    pub script_url: Option<String>,
    #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(rename = "variationNumber", skip_serializing_if = "Option::is_none")]
    pub variation_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GenerateResponse {
    fn bare(status: &'static str) -> Self {
        Self {
            status,
            cached: None,
            script: None,
            image_url: None,
            script_url: None,
            job_id: None,
            variation_number: None,
            position: None,
            message: None,
        }
    }
}

/// How the ingress will act on a classified message.
#[derive(Debug, Clone, PartialEq)]
enum Plan {
    /// Reuse the session's (url, idea); next variation.
    Redo,
    /// URL present, no custom idea: synthesize one. `copy_mode` emits the
    /// transcript instead of a generation.
    Instant { copy_mode: bool },
    /// URL (payload or session) plus an explicit idea.
    Guided { idea: String, url_from_session: bool },
    /// URL with no trigger: remember it and ask for an idea.
    StoreUrlAwaitIdea,
    /// Nothing actionable: answer conversationally.
    FriendlyPrompt,
}

/// Pure branch resolution; the ordering is the contract.
fn resolve_plan(parsed: &ParsedIntent, has_url: bool, session: &SessionContext) -> Plan {
    if parsed.is_redo && session.last_url.is_some() && session.last_idea.is_some() {
        return Plan::Redo;
    }
    if parsed.is_copy_flow && has_url {
        return Plan::Instant { copy_mode: true };
    }
    if parsed.is_instant_flow && has_url {
        return Plan::Instant { copy_mode: false };
    }
    if has_url && parsed.intent == IntentType::Idea {
        return Plan::Guided {
            idea: parsed.cleaned_message.clone(),
            url_from_session: false,
        };
    }
    if has_url {
        return Plan::StoreUrlAwaitIdea;
    }
    if parsed.intent == IntentType::Idea
        && session.state == SessionState::AwaitingIdea
        && session.last_url.is_some()
    {
        return Plan::Guided {
            idea: parsed.cleaned_message.clone(),
            url_from_session: true,
        };
    }
    Plan::FriendlyPrompt
}

fn subscriber_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4,20}$").expect("static subscriber pattern"))
}

/// Vendor placeholder convention: un-rendered `{{field}}` values arrive
/// verbatim and are treated as absent.
fn coerce_placeholder(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() || (trimmed.starts_with("{{") && trimmed.ends_with("}}")) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn validate_subscriber_id(subscriber_id: &str) -> ApiResult<()> {
    if subscriber_id_pattern().is_match(subscriber_id) {
        Ok(())
    } else {
        Err(ApiError::validation("subscriber_id must be a numeric id"))
    }
}

fn validate_idea_text(idea: &str) -> ApiResult<()> {
    let len = idea.len();
    if len < 4 {
        return Err(ApiError::validation("user_idea must be at least 4 characters"));
    }
    if len > 500 {
        return Err(ApiError::validation("user_idea must be at most 500 characters"));
    }
    if idea.chars().any(|c| matches!(c, '<' | '>' | '{' | '}' | '`')) {
        return Err(ApiError::validation("user_idea contains unsupported characters"));
    }
    Ok(())
}

fn advisory(variation_number: u32, soft_limit: u32) -> Option<String> {
    if variation_number > soft_limit {
        Some(format!(
            " You're on version #{} for this idea — a fresh idea usually beats another remix.",
            variation_number
        ))
    } else {
        None
    }
}

fn with_quota_headers(
    status: StatusCode,
    body: GenerateResponse,
    remaining: u64,
    reset_secs: u64,
) -> Response {
    let mut response = (status, Json(body)).into_response();
    let headers = response.headers_mut();
    if let Ok(v) = remaining.to_string().parse() {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = reset_secs.to_string().parse() {
        headers.insert("X-RateLimit-Reset", v);
    }
    response
}

/// POST /api/v1/script/generate
pub async fn generate(
    State(state): State<AppState>,
    Json(raw): Json<GenerateRequest>,
) -> ApiResult<Response> {
    // Placeholder coercion precedes validation.
    let reel_url = coerce_placeholder(raw.reel_url);
    let user_idea = coerce_placeholder(raw.user_idea);
    let tone_hint = coerce_placeholder(raw.tone_hint);
    let language_hint = coerce_placeholder(raw.language_hint);
    let mode_raw = coerce_placeholder(raw.mode);

    validate_subscriber_id(&raw.subscriber_id)?;
    let subscriber_id = raw.subscriber_id;

    if let Some(ref url) = reel_url {
        if !is_supported_reel_url(url) {
            return Err(ApiError::validation("reel_url must be an https reel link on a supported host"));
        }
    }
    if let Some(ref idea) = user_idea {
        validate_idea_text(idea)?;
    }
    if let Some(ref hint) = tone_hint {
        if Tone::parse(hint).is_none() {
            return Err(ApiError::validation(
                "tone_hint must be one of professional, funny, provocative, educational, casual",
            ));
        }
    }
    if let Some(ref hint) = language_hint {
        if hint.len() > 50 || !hint.chars().all(|c| c.is_alphabetic()) {
            return Err(ApiError::validation("language_hint must be letters only, at most 50"));
        }
    }
    let requested_mode = match mode_raw.as_deref() {
        None => None,
        Some(raw) => Some(
            ScriptMode::parse(raw)
                .ok_or_else(|| ApiError::validation("mode must be full or hook_only"))?,
        ),
    };

    // Gate chain (beta admission, block flag, quota).
    let gate = AccessGate::new(state.users.clone(), state.quota.clone());
    let (user, quota_remaining, quota_reset_secs) =
        match gate.check(&subscriber_id, &state.config).await? {
            GateOutcome::Admitted {
                user,
                quota_remaining,
                quota_reset_secs,
            } => (user, quota_remaining, quota_reset_secs),
            GateOutcome::Waitlisted { position } => {
                let mut body = GenerateResponse::bare("waitlist");
                body.position = Some(position);
                body.message = Some(format!(
                    "The beta is currently full. You're #{} in line — we'll let you know the moment a spot opens.",
                    position
                ));
                return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
            }
        };
    debug!(subscriber_id = %user.subscriber_id, "Gate passed");

    // Intent classification; an embedded URL counts as the reel URL when
    // the dedicated field is empty.
    let text = user_idea.clone().unwrap_or_default();
    let (embedded_url, parsed) = parse_with_url(&text);
    let effective_url = reel_url.or(embedded_url.filter(|u| is_supported_reel_url(u)));
    let canonical = effective_url.as_deref().map(canonicalize_url);

    let mut session = state.sessions.load_or_fresh(&subscriber_id).await?;
    let plan = resolve_plan(&parsed, canonical.is_some(), &session);
    debug!(?plan, intent = ?parsed.intent, "Resolved ingress plan");

    // Resolve the (url, idea, copy_mode) triple per plan.
    let (url, idea, copy_mode) = match &plan {
        Plan::Redo => {
            let url = session.last_url.clone().unwrap_or_default();
            let idea = session.last_idea.clone().unwrap_or_default();
            (url, idea, false)
        }
        Plan::Instant { copy_mode } => {
            let url = canonical.clone().unwrap_or_default();
            let memory = state.memory.get(&subscriber_id).await.unwrap_or_else(|e| {
                warn!("User memory lookup failed (ignored): {}", e);
                None
            });
            let analysis = state.analyses.get(&reel_hash(&url)).await.unwrap_or_else(|e| {
                warn!("Analysis peek failed (ignored): {}", e);
                None
            });
            let idea = default_idea(memory.as_ref(), analysis.as_ref());
            (url, idea, *copy_mode)
        }
        Plan::Guided { idea, url_from_session } => {
            let url = if *url_from_session {
                session.last_url.clone().unwrap_or_default()
            } else {
                canonical.clone().unwrap_or_default()
            };
            (url, idea.clone(), false)
        }
        Plan::StoreUrlAwaitIdea => {
            let url = canonical.clone().unwrap_or_default();
            session.observe_url(&url);
            state.sessions.save(&session).await?;

            // Prompt through the messaging breaker; a messaging outage must
            // not fail the ingress.
            let prompt = "Got the reel! What should your version be about? \
                          Reply with your idea, or say \"generate\" and I'll pick an angle.";
            let send = state
                .breakers
                .call(breaker_services::MESSAGING, state.messaging.send_text(&subscriber_id, prompt))
                .await;
            match send {
                Ok(Err(e)) => warn!("Prompt delivery failed (ignored): {}", e),
                Err(open) => warn!("Messaging circuit open, prompt skipped: {}", open),
                Ok(Ok(())) => {}
            }

            let mut body = GenerateResponse::bare("awaiting_idea");
            body.message = Some("Reel saved — tell me what your version should be about.".to_string());
            return Ok(with_quota_headers(StatusCode::OK, body, quota_remaining, quota_reset_secs));
        }
        Plan::FriendlyPrompt => {
            let message = match parsed.intent {
                IntentType::PositiveFeedback => {
                    "Love to hear it! Send me another reel whenever you're ready."
                }
                IntentType::NegativeFeedback => {
                    "Thanks for the honesty — send the reel again with a tweak to the idea and I'll take another shot."
                }
                _ => {
                    "Send me an Instagram reel link and an idea, and I'll turn it into a script you can shoot today."
                }
            };
            let mut body = GenerateResponse::bare("ok");
            body.message = Some(message.to_string());
            return Ok(with_quota_headers(StatusCode::OK, body, quota_remaining, quota_reset_secs));
        }
    };

    // Modifier resolution: payload hints beat detected modifiers.
    let mode = requested_mode.unwrap_or(if parsed.is_hook_only {
        ScriptMode::HookOnly
    } else {
        ScriptMode::Full
    });
    let tone = tone_hint.as_deref().and_then(Tone::parse).or(parsed.detected_tone);

    // Variation index and tier-2 key. An identical re-submission stays in
    // its variation family and reuses the last index (so the cache and the
    // in-flight dedup apply); a redo or a new idea draws the next one.
    let is_redo = matches!(plan, Plan::Redo);
    let same_family = !is_redo
        && session.last_url.as_deref() == Some(url.as_str())
        && session
            .last_idea
            .as_deref()
            .map(|prev| prev.trim().eq_ignore_ascii_case(idea.trim()))
            .unwrap_or(false);

    let variation_index = if same_family {
        match state.sessions.current_variation(&subscriber_id, &url, &idea).await? {
            Some(index) => index,
            None => {
                state
                    .sessions
                    .get_and_increment_variation(&subscriber_id, &url, &idea)
                    .await?
            }
        }
    } else {
        state
            .sessions
            .get_and_increment_variation(&subscriber_id, &url, &idea)
            .await?
    };
    let hash = request_hash(&subscriber_id, &url, &idea, variation_index, mode);

    // Variation zero consults the script cache; repeats bypass it.
    if variation_index == 0 {
        match state.scripts.get_by_request_hash(&hash).await {
            Ok(Some(script)) => {
                metrics::record_cache_event("tier2", true);
                info!(request_hash = %hash, "Tier-2 cache hit, answering inline");

                session.observe_url(&url);
                session.observe_idea(&idea);
                session.observe_result(&hash, script.public_id.as_str());
                state.sessions.save(&session).await?;

                let mut body = GenerateResponse::bare("success");
                body.cached = Some(true);
                body.script = Some(script.script_text.clone());
                body.image_url = script.image_urls.first().cloned();
                body.script_url = Some(script.view_url.clone());
                return Ok(with_quota_headers(StatusCode::OK, body, quota_remaining, quota_reset_secs));
            }
            Ok(None) => metrics::record_cache_event("tier2", false),
            Err(e) => {
                // A cache miss-by-error degrades to the queue path.
                warn!("Tier-2 cache lookup failed (degrading to enqueue): {}", e);
                metrics::record_cache_event("tier2", false);
            }
        }
    }

    // One active job per request hash: reuse the in-flight one.
    if let Some(existing) = state.jobs.find_active_by_request_hash(&hash).await? {
        info!(request_hash = %hash, job_id = %existing.job_id, "Reusing in-flight job");
        let mut body = GenerateResponse::bare("queued");
        body.job_id = Some(existing.job_id.to_string());
        body.variation_number = Some(variation_index + 1);
        body.message = Some("Already working on this one — hang tight!".to_string());
        return Ok(with_quota_headers(StatusCode::ACCEPTED, body, quota_remaining, quota_reset_secs));
    }

    // Persist the job record, then enqueue.
    let record = JobRecord::queued(&subscriber_id, &hash);
    state.jobs.insert(&record).await?;

    let mut job = ScriptJob::new(
        &subscriber_id,
        &hash,
        reel_hash(&url),
        &url,
        &idea,
        variation_index,
    );
    job.job_id = record.job_id.to_string();
    job.mode = mode;
    job.is_copy_mode = copy_mode;
    job.tone = tone;
    job.intensity = parsed.intensity;
    job.language_hint = language_hint;

    match state.queue.enqueue(&job).await {
        Ok(_) => {}
        Err(e) if e.is_duplicate() => {
            debug!(job_id = %job.job_id, "Enqueue dedup hit; job already on stream");
        }
        Err(e) => return Err(e.into()),
    }

    session.observe_url(&url);
    session.observe_idea(&idea);
    session.state = SessionState::Processing;
    session.active_job_id = Some(job.job_id.clone());
    session.touch();
    state.sessions.save(&session).await?;

    let variation_number = variation_index + 1;
    let mut message = format!(
        "On it! Version #{} of your script is being written — you'll get it here in about a minute.",
        variation_number
    );
    if let Some(note) = advisory(variation_number, state.config.soft_variation_limit) {
        message.push_str(&note);
    }

    let mut body = GenerateResponse::bare("queued");
    body.job_id = Some(job.job_id);
    body.variation_number = Some(variation_number);
    body.message = Some(message);
    Ok(with_quota_headers(StatusCode::ACCEPTED, body, quota_remaining, quota_reset_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelscript_models::parse_message;

    fn fresh_session() -> SessionContext {
        SessionContext::fresh("12345")
    }

    #[test]
    fn test_coerce_placeholder() {
        assert_eq!(coerce_placeholder(Some("{{user_idea}}".into())), None);
        assert_eq!(coerce_placeholder(Some("  {{x}}  ".into())), None);
        assert_eq!(coerce_placeholder(Some("".into())), None);
        assert_eq!(coerce_placeholder(Some(" real idea ".into())), Some("real idea".into()));
        assert_eq!(coerce_placeholder(None), None);
    }

    #[test]
    fn test_subscriber_id_validation() {
        assert!(validate_subscriber_id("12345").is_ok());
        assert!(validate_subscriber_id("12a45").is_err());
        assert!(validate_subscriber_id("").is_err());
        assert!(validate_subscriber_id("123").is_err(), "too short");
    }

    #[test]
    fn test_idea_length_boundaries() {
        assert!(validate_idea_text("abc").is_err(), "length 3 rejected");
        assert!(validate_idea_text("abcd").is_ok(), "length 4 accepted");
        assert!(validate_idea_text(&"a".repeat(500)).is_ok(), "length 500 accepted");
        assert!(validate_idea_text(&"a".repeat(501)).is_err(), "length 501 rejected");
    }

    #[test]
    fn test_idea_injection_characters_rejected() {
        for bad in ["has <tag>", "brace {x}", "tick ` here"] {
            assert!(validate_idea_text(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_plan_redo_requires_prior_session() {
        let parsed = parse_message("another");
        assert_eq!(resolve_plan(&parsed, false, &fresh_session()), Plan::FriendlyPrompt);

        let mut session = fresh_session();
        session.last_url = Some("https://www.instagram.com/reel/AbC".into());
        session.last_idea = Some("coding".into());
        assert_eq!(resolve_plan(&parsed, false, &session), Plan::Redo);
    }

    #[test]
    fn test_plan_copy_with_url() {
        let parsed = parse_message("copy this");
        assert_eq!(
            resolve_plan(&parsed, true, &fresh_session()),
            Plan::Instant { copy_mode: true }
        );
    }

    #[test]
    fn test_plan_url_without_trigger_awaits_idea() {
        let parsed = parse_message("");
        assert_eq!(resolve_plan(&parsed, true, &fresh_session()), Plan::StoreUrlAwaitIdea);
    }

    #[test]
    fn test_plan_feedback_with_url_awaits_idea() {
        // Scenario: an emoji plus a URL. Feedback is not a generation
        // trigger, so the URL is stored and the user is prompted.
        let parsed = parse_message("🔥");
        assert_eq!(parsed.intent, IntentType::PositiveFeedback);
        assert_eq!(resolve_plan(&parsed, true, &fresh_session()), Plan::StoreUrlAwaitIdea);
    }

    #[test]
    fn test_plan_idea_after_awaiting() {
        let parsed = parse_message("make it about sourdough baking");
        let mut session = fresh_session();
        session.last_url = Some("https://www.instagram.com/reel/AbC".into());
        session.state = SessionState::AwaitingIdea;
        match resolve_plan(&parsed, false, &session) {
            Plan::Guided { url_from_session, .. } => assert!(url_from_session),
            other => panic!("expected Guided, got {:?}", other),
        }
    }

    #[test]
    fn test_advisory_only_past_soft_limit() {
        assert!(advisory(5, 5).is_none());
        assert!(advisory(6, 5).is_some());
    }
}
