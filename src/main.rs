use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use url_shortener::{config, persistence::Persistence, router, store::UrlStore, AppState};

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be set
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "url_shortener=info,shortener=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Flags first, environment as fallback
    let config = config::AppConfig::load()?;
    tracing::info!("Starting URL shortener on {}", config.server_address);
    tracing::info!("Base URL: {}", config.base_url);
    tracing::info!(
        "File storage: {}",
        config
            .file_storage_path
            .as_ref()
            .map_or("disabled".into(), |p| p.display().to_string())
    );
    tracing::info!(
        "Database: {}",
        if config.database_dsn.is_some() { "enabled" } else { "disabled" }
    );

    // Rebuild the in-memory store from whichever backend is configured.
    // A missing or unreachable backend is expected on first launch.
    let store = Arc::new(UrlStore::new());
    let persistence = Persistence::from_config(&config).await;
    if let Err(e) = persistence.load_into(&store).await {
        tracing::warn!("Cannot load data to storage, starting empty: {}", e);
    }
    tracing::info!("RAM storage contains {} record(s)", store.len());

    let bind_addr = config.server_address.clone();
    let state = Arc::new(AppState::new(config, store, persistence));
    let app = router(state);

    // ── Serve ──────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("cannot bind {bind_addr}"))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
