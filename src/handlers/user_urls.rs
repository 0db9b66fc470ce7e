use crate::{
    auth::CurrentUser, owned_url::OwnedUrl, store::DELETED_PREFIX, AppState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::json_error;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct UserUrl {
    short_url: String,
    original_url: String,
}

/// GET /api/user/urls
///
/// 401 for a caller that arrived without a valid token, 204 when the caller
/// owns nothing, otherwise every active link they shortened.
pub async fn list(State(state): State<Arc<AppState>>, user: CurrentUser) -> Response {
    if user.is_new {
        return json_error(StatusCode::UNAUTHORIZED, "Unauthorized: No user ID");
    }

    let urls = user_urls(&state, &user.id);
    if urls.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }
    Json(urls).into_response()
}

/// DELETE /api/user/urls
///
/// Accepts a JSON array of short IDs (or full short URLs) and answers 202
/// straight away. The store deletions and their durable counterpart run in
/// the background; per-key failures are only logged.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> Response {
    let Json(ids) = match payload {
        Ok(p) => p,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.body_text()),
    };
    if ids.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Empty batch");
    }

    let keys: Vec<String> = ids
        .iter()
        .map(|id| state.config.short_id(id.trim()).to_owned())
        .collect();

    let tasks = match state.store.delete_keys(&user.id, keys.clone()) {
        Ok(tasks) => tasks,
        Err(e) => {
            tracing::error!("Cannot dispatch deletions for user {}: {}", user.id, e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };
    tracing::info!("{} deletion(s) dispatched for user {}", tasks.len(), user.id);

    // Durable backends follow once the in-memory renames have landed.
    let state_bg = state.clone();
    tokio::spawn(async move {
        tasks.wait().await;
        if let Err(e) = state_bg
            .persistence
            .reflect_deletions(&user.id, &keys, &state_bg.store)
            .await
        {
            tracing::warn!("Cannot reflect deletions for user {}: {}", user.id, e);
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "Accepted" })),
    )
        .into_response()
}

/// Linear scan of the store for the active links owned by `owner`.
fn user_urls(state: &AppState, owner: &str) -> Vec<UserUrl> {
    let mut urls: Vec<UserUrl> = state
        .store
        .snapshot()
        .into_iter()
        .filter(|(short_id, _)| !short_id.starts_with(DELETED_PREFIX))
        .filter_map(|(short_id, stored)| {
            let owned = OwnedUrl::decode(&stored)?;
            (owned.owner == owner).then(|| UserUrl {
                short_url: state.config.short_url(&short_id),
                original_url: owned.url,
            })
        })
        .collect();

    urls.sort_by(|a, b| a.short_url.cmp(&b.short_url));
    urls
}
