use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer, decompression::RequestDecompressionLayer,
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod db;
pub mod file_storage;
pub mod handlers;
pub mod owned_url;
pub mod persistence;
pub mod shortener;
pub mod store;

use auth::TokenKeys;
use config::AppConfig;
use persistence::Persistence;
use store::UrlStore;

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub config: AppConfig,
    /// Authoritative short ID ⇄ value mapping; every request is served from it.
    pub store: Arc<UrlStore>,
    /// Where new mappings are replicated and startup data is read from.
    pub persistence: Persistence,
    pub tokens: TokenKeys,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<UrlStore>, persistence: Persistence) -> Self {
        let tokens = TokenKeys::new(&config);
        Self {
            config,
            store,
            persistence,
            tokens,
        }
    }
}

// ── Router ─────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/shorten", post(handlers::shorten::shorten_json))
        .route("/shorten/batch", post(handlers::shorten::shorten_batch))
        .route(
            "/user/urls",
            get(handlers::user_urls::list).delete(handlers::user_urls::delete),
        );

    Router::new()
        .route("/", post(handlers::shorten::shorten_text))
        .route("/ping", get(handlers::redirect::ping))
        .nest("/api", api_router)
        // Short-link redirect; static routes above take priority
        .route("/:id", get(handlers::redirect::redirect))
        .layer(middleware::from_fn_with_state(state.clone(), auth::identify))
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}
