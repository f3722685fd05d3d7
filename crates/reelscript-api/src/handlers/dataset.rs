//! Dataset export for the training pipeline (admin only).

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use reelscript_models::DatasetRecord;

use crate::error::{ApiError, ApiResult};
use crate::handlers::require_admin;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_limit")]
    pub limit: i32,
    #[serde(default)]
    pub skip: i32,
    #[serde(default)]
    pub validated: Option<String>,
}

fn default_format() -> String {
    "json".to_string()
}

fn default_limit() -> i32 {
    100
}

/// GET /api/v1/dataset/export?format=json|csv&limit&skip&validated=true
pub async fn export_dataset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    require_admin(&headers, &state.config)?;

    if !matches!(query.format.as_str(), "json" | "csv") {
        return Err(ApiError::validation("format must be json or csv"));
    }
    let limit = query.limit.clamp(1, 1000);
    let skip = query.skip.max(0);
    let validated_only = query.validated.as_deref() == Some("true");

    let records = state.dataset.list(limit, skip, validated_only).await?;

    if query.format == "csv" {
        let csv = records_to_csv(&records);
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"dataset_export.csv\"",
                ),
            ],
            csv,
        )
            .into_response());
    }

    Ok(Json(records).into_response())
}

const CSV_COLUMNS: &[&str] = &[
    "request_hash",
    "subscriber_id",
    "canonical_url",
    "idea",
    "variation_index",
    "mode",
    "generator_version",
    "generation_ms",
    "tier1_cache_hit",
    "is_copy_mode",
    "word_count",
    "sentence_count",
    "hook_word_count",
    "feedback_count",
    "last_rating",
    "validated",
    "created_at",
];

fn records_to_csv(records: &[DatasetRecord]) -> String {
    let mut out = String::new();
    out.push_str(&CSV_COLUMNS.join(","));
    out.push('\n');

    for record in records {
        let last_rating = record
            .feedback
            .iter()
            .rev()
            .find_map(|e| e.rating())
            .map(|r| r.to_string())
            .unwrap_or_default();

        let row = [
            record.request_hash.clone(),
            record.subscriber_id.clone(),
            record.canonical_url.clone(),
            record.idea.clone(),
            record.variation_index.to_string(),
            record.mode.as_str().to_string(),
            record.generator_version.clone(),
            record.generation_ms.to_string(),
            record.tier1_cache_hit.to_string(),
            record.is_copy_mode.to_string(),
            record.derived.word_count.to_string(),
            record.derived.sentence_count.to_string(),
            record.derived.hook_word_count.to_string(),
            record.feedback.len().to_string(),
            last_rating,
            record.validated.to_string(),
            record.created_at.to_rfc3339(),
        ];

        let escaped: Vec<String> = row.iter().map(|field| escape_csv(field)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }

    out
}

/// RFC 4180 quoting: wrap and double-quote when the field contains a comma,
/// quote, or newline.
fn escape_csv(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reelscript_models::{DerivedFeatures, ScriptMode};

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_csv_header_and_row_count() {
        let record = DatasetRecord {
            request_hash: "h".into(),
            subscriber_id: "1".into(),
            canonical_url: "u".into(),
            idea: "an idea, with a comma".into(),
            variation_index: 0,
            mode: ScriptMode::Full,
            script_text: String::new(),
            generator_version: "v".into(),
            generation_ms: 1,
            tier1_cache_hit: false,
            is_copy_mode: false,
            experiment_ids: vec![],
            derived: DerivedFeatures::default(),
            feedback: vec![],
            validated: false,
            created_at: Utc::now(),
        };
        let csv = records_to_csv(&[record]);
        let lines: Vec<&str> = csv.trim_end().lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("request_hash,"));
        assert!(lines[1].contains("\"an idea, with a comma\""));
    }
}
