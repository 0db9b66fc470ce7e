use crate::{auth::CurrentUser, owned_url::OwnedUrl, shortener::derive_short_id, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::json_error;

// ── Request / response types ───────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ShortenRequest {
    url: String,
}

#[derive(Serialize)]
pub struct ShortenResponse {
    result: String,
}

#[derive(Deserialize)]
pub struct BatchItem {
    correlation_id: String,
    original_url: String,
}

#[derive(Serialize)]
pub struct BatchResult {
    correlation_id: String,
    short_url: String,
}

// ── Handlers ───────────────────────────────────────────────────────────────

/// POST /
/// Plain-text body in, plain-text short URL out.
pub async fn shorten_text(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    body: String,
) -> Response {
    let owned = match owned_url(user, &body) {
        Ok(owned) => owned,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    let (short_url, is_new) = shorten_and_save(&state, &owned).await;
    (
        created_or_conflict(is_new),
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        short_url,
    )
        .into_response()
}

/// POST /api/shorten
/// `{"url": "..."}` in, `{"result": "<short url>"}` out.
pub async fn shorten_json(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    payload: Result<Json<ShortenRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.body_text()),
    };

    let owned = match owned_url(user, &req.url) {
        Ok(owned) => owned,
        Err(msg) => return json_error(StatusCode::BAD_REQUEST, msg),
    };

    let (result, is_new) = shorten_and_save(&state, &owned).await;
    (created_or_conflict(is_new), Json(ShortenResponse { result })).into_response()
}

/// POST /api/shorten/batch
///
/// Items with an empty (or unrepresentable) URL come back with an empty
/// `short_url` and are not stored.
pub async fn shorten_batch(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    payload: Result<Json<Vec<BatchItem>>, JsonRejection>,
) -> Response {
    let Json(items) = match payload {
        Ok(p) => p,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.body_text()),
    };
    if items.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Empty batch");
    }

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let short_url = match owned_url(user.clone(), &item.original_url) {
            Ok(owned) => shorten_and_save(&state, &owned).await.0,
            Err(msg) => {
                tracing::warn!("Batch item '{}' skipped: {}", item.correlation_id, msg);
                String::new()
            }
        };
        results.push(BatchResult {
            correlation_id: item.correlation_id,
            short_url,
        });
    }

    (StatusCode::CREATED, Json(results)).into_response()
}

// ── Private helpers ────────────────────────────────────────────────────────

fn owned_url(user: CurrentUser, url: &str) -> Result<OwnedUrl, &'static str> {
    let url = url.trim();
    if url.is_empty() {
        return Err("Empty URL");
    }
    // Must be usable as the Location header of the redirect.
    if HeaderValue::from_str(url).is_err() {
        return Err("URL contains characters not allowed in a header");
    }
    OwnedUrl::new(user.id, url).ok_or("URL must not contain '@'")
}

fn created_or_conflict(is_new: bool) -> StatusCode {
    if is_new {
        StatusCode::CREATED
    } else {
        StatusCode::CONFLICT
    }
}

/// Derive the short ID, commit it to the store and, when it is new,
/// replicate it. Returns the short URL and whether it was created.
///
/// Replication failures are only logged; the in-memory entry already serves
/// redirects.
async fn shorten_and_save(state: &AppState, owned: &OwnedUrl) -> (String, bool) {
    let value = owned.encode();
    let (short_id, is_new) = state.store.set(&derive_short_id(&value), &value);

    if is_new {
        if let Err(e) = state.persistence.store(&short_id, &value).await {
            tracing::warn!("Cannot persist {}, keeping it in memory only: {}", short_id, e);
        }
    }

    (state.config.short_url(&short_id), is_new)
}
