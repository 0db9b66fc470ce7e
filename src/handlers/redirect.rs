use crate::{owned_url::OwnedUrl, store::DELETED_PREFIX, AppState};
use axum::{
    extract::{Path, State},
    http::{header::LOCATION, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// GET /:id
///
/// 1. Look the short ID up in the in-memory store.
/// 2. A soft-deleted ID answers 410, an unknown one 404.
/// 3. Otherwise decode the stored value and 307 to the original URL.
pub async fn redirect(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    if id.starts_with(DELETED_PREFIX) {
        return (StatusCode::GONE, "URL was deleted").into_response();
    }

    let Some(stored) = state.store.get(&id) else {
        if state.store.is_deleted(&id) {
            return (StatusCode::GONE, "URL was deleted").into_response();
        }
        return (StatusCode::NOT_FOUND, "URL not found").into_response();
    };

    let Some(owned) = OwnedUrl::decode(&stored).filter(|owned| !owned.url.is_empty()) else {
        tracing::error!("Stored value for '{}' cannot be decoded: {:?}", id, stored);
        return (StatusCode::NOT_FOUND, "URL not found").into_response();
    };

    match HeaderValue::from_str(&owned.url) {
        Ok(location) => (StatusCode::TEMPORARY_REDIRECT, [(LOCATION, location)]).into_response(),
        Err(e) => {
            tracing::error!("Stored URL for '{}' is not a valid Location: {}", id, e);
            (StatusCode::NOT_FOUND, "URL not found").into_response()
        }
    }
}

/// GET /ping
///
/// 200 when the database answers, 500 otherwise (including when no database
/// is configured).
pub async fn ping(State(state): State<Arc<AppState>>) -> Response {
    if state.persistence.ping_database().await {
        StatusCode::OK.into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "No connection to database",
        )
            .into_response()
    }
}
