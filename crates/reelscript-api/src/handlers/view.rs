//! Public copy view: a read-only, cache-friendly HTML render of one script.

use askama::Template;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};

use reelscript_models::{PublicId, ScriptSections};

use crate::state::AppState;

#[derive(Template)]
#[template(path = "script_view.html")]
struct ScriptViewTemplate {
    hook: String,
    body: String,
    cta: String,
}

const NOT_FOUND_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<meta name=\"robots\" content=\"noindex, nofollow\"><title>Not found</title></head>\
<body><p>This script doesn't exist or is no longer available.</p></body></html>";

fn html_response(status: StatusCode, cacheable: bool, body: String) -> Response {
    let cache_control = if cacheable {
        "public, max-age=3600"
    } else {
        "no-store"
    };
    (
        status,
        [
            (header::CACHE_CONTROL, cache_control),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (header::HeaderName::from_static("x-robots-tag"), "noindex, nofollow"),
        ],
        Html(body),
    )
        .into_response()
}

/// GET /s/{public_id}
pub async fn view_script(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> Response {
    let Some(public_id) = PublicId::parse(&public_id) else {
        return html_response(
            StatusCode::BAD_REQUEST,
            false,
            "<!DOCTYPE html><html><body><p>Invalid link.</p></body></html>".to_string(),
        );
    };

    let script = match state.scripts.get_by_public_id(&public_id).await {
        Ok(Some(script)) => script,
        Ok(None) => {
            return html_response(StatusCode::NOT_FOUND, false, NOT_FOUND_PAGE.to_string());
        }
        Err(e) => {
            tracing::error!("Public view lookup failed: {}", e);
            return html_response(
                StatusCode::SERVICE_UNAVAILABLE,
                false,
                "<!DOCTYPE html><html><body><p>Temporarily unavailable.</p></body></html>".to_string(),
            );
        }
    };

    let sections = ScriptSections::parse(&script.script_text);
    let template = ScriptViewTemplate {
        hook: sections.hook,
        body: sections.body,
        cta: sections.cta,
    };

    match template.render() {
        Ok(rendered) => html_response(StatusCode::OK, true, rendered),
        Err(e) => {
            tracing::error!("Template render failed: {}", e);
            html_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                false,
                "<!DOCTYPE html><html><body><p>Something went wrong.</p></body></html>".to_string(),
            )
        }
    }
}
