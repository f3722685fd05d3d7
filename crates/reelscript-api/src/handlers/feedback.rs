//! Feedback ingest and aggregate stats.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use reelscript_models::{FeedbackEvent, SectionFeedback, VideoPerformance};

use crate::error::{ApiError, ApiResult};
use crate::handlers::require_admin;
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub subscriber_id: String,
    pub request_hash: String,
    #[serde(default)]
    pub overall_rating: Option<u8>,
    #[serde(default)]
    pub section_feedback: Option<SectionFeedback>,
    #[serde(default)]
    pub feedback_text: Option<String>,
    #[serde(default)]
    pub video_performance: Option<VideoPerformance>,
}

#[derive(Serialize)]
pub struct FeedbackResponse {
    pub status: &'static str,
}

/// POST /api/v1/feedback
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<Json<FeedbackResponse>> {
    if let Some(rating) = request.overall_rating {
        if !(1..=5).contains(&rating) {
            return Err(ApiError::validation("overall_rating must be between 1 and 5"));
        }
    }
    if let Some(ref text) = request.feedback_text {
        if text.len() > 1000 {
            return Err(ApiError::validation("feedback_text must be at most 1000 characters"));
        }
    }
    if request.request_hash.len() != 64 || !request.request_hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::validation("request_hash is not a valid request hash"));
    }

    let event = FeedbackEvent::V2 {
        overall_rating: request.overall_rating,
        section_feedback: request.section_feedback,
        feedback_text: request.feedback_text,
        video_performance: request.video_performance,
        recorded_at: Utc::now(),
    };

    state.dataset.append_feedback(&request.request_hash, event).await.map_err(|e| match e {
        reelscript_store::StoreError::NotFound(_) => {
            ApiError::validation("no generation found for this request_hash")
        }
        other => other.into(),
    })?;

    if let Some(rating) = request.overall_rating {
        let positive = rating >= 4;
        metrics::record_feedback(positive);

        // Quality score and user memory are best-effort companions of the
        // dataset write.
        if let Err(e) = state.scripts.update_quality(&request.request_hash, rating as f64).await {
            warn!("Quality score update failed (ignored): {}", e);
        }
        if let Err(e) = state.memory.record_feedback(&request.subscriber_id, positive).await {
            warn!("User memory update failed (ignored): {}", e);
        }
    }

    info!(
        subscriber_id = %request.subscriber_id,
        request_hash = %request.request_hash,
        "Recorded feedback"
    );
    Ok(Json(FeedbackResponse { status: "ok" }))
}

#[derive(Serialize)]
pub struct FeedbackStats {
    pub records_sampled: usize,
    pub with_feedback: usize,
    pub average_rating: Option<f64>,
    pub positive: u64,
    pub negative: u64,
}

/// GET /api/v1/feedback/stats (admin)
pub async fn feedback_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<FeedbackStats>> {
    require_admin(&headers, &state.config)?;

    let records = state.dataset.list(500, 0, false).await?;

    let mut with_feedback = 0usize;
    let mut ratings: Vec<u8> = Vec::new();
    let (mut positive, mut negative) = (0u64, 0u64);

    for record in &records {
        if record.feedback.is_empty() {
            continue;
        }
        with_feedback += 1;
        for event in &record.feedback {
            if let Some(rating) = event.rating() {
                ratings.push(rating);
                if rating >= 4 {
                    positive += 1;
                } else {
                    negative += 1;
                }
            }
        }
    }

    let average_rating = if ratings.is_empty() {
        None
    } else {
        Some(ratings.iter().map(|r| *r as f64).sum::<f64>() / ratings.len() as f64)
    };

    Ok(Json(FeedbackStats {
        records_sampled: records.len(),
        with_feedback,
        average_rating,
        positive,
        negative,
    }))
}
