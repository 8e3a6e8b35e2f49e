//! portal-daemon entry point.
//!
//! Thin: loads config, connects and migrates the database, builds the action
//! orchestrator, wires middleware, and starts the HTTP server. Handlers live
//! in `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use portal_actions::{ActionOrchestrator, PgPurchaseOrderStore};
use portal_daemon::{routes, state};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Production injects env
    // vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = portal_config::load_from_env().context("load config")?;
    let cfg = &loaded.config;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let db_url = std::env::var(&cfg.database.url_env)
        .with_context(|| format!("missing env var {}", cfg.database.url_env))?;
    let pool = portal_db::connect(
        &db_url,
        cfg.database.max_connections,
        cfg.database.acquire_timeout(),
    )
    .await?;
    portal_db::migrate(&pool).await?;

    let orchestrator = ActionOrchestrator::new(
        PgPurchaseOrderStore::new(pool),
        cfg.actions.tx_timeout(),
    );
    let shared = Arc::new(state::AppState::new(
        Arc::new(orchestrator),
        loaded.config_hash.clone(),
    ));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or(cfg.server.bind_addr);
    info!("portal-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// `PORTAL_DAEMON_ADDR` overrides `server.bind_addr`.
fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("PORTAL_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
