//! Short-link service: code allocation, redirect resolution and click
//! aggregation on top of SQLite.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod aggregator;
pub mod auth;
pub mod cache;
pub mod clicks;
pub mod codegen;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod validate;

use aggregator::Aggregator;
use clicks::{ClickLog, ClickRecorder};
use codegen::CodeGenerator;
use config::AppConfig;
use resolver::RedirectResolver;
use store::LinkStore;

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub config: AppConfig,
    pub store: LinkStore,
    /// Kept here so shutdown can drain it; the resolver holds a clone.
    pub recorder: ClickRecorder,
    pub resolver: RedirectResolver,
    pub aggregator: Aggregator,
}

impl AppState {
    /// Wire the engine components over `pool`. Spawns the click writer, so
    /// this must run inside a tokio runtime.
    pub fn new(config: AppConfig, pool: SqlitePool) -> Self {
        let generator = CodeGenerator::new(config.code_length, config.code_max_attempts);
        let store = LinkStore::new(pool.clone(), generator)
            .with_link_ttl(config.link_ttl())
            .with_retry(config.retry());

        let recorder = ClickRecorder::spawn(ClickLog::new(pool.clone()), config.recorder());
        let resolver = RedirectResolver::new(store.clone(), recorder.clone());
        let aggregator = Aggregator::new(pool, config.dashboard_months);

        Self {
            config,
            store,
            recorder,
            resolver,
            aggregator,
        }
    }
}

// ── Router ─────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route(
            "/links",
            get(handlers::api::list_links).post(handlers::api::create_link),
        )
        .route(
            "/links/:code",
            post(handlers::api::update_link).delete(handlers::api::delete_link),
        )
        .route("/links/:code/stats", get(handlers::api::link_stats))
        .route("/dashboard", get(handlers::api::dashboard));

    Router::new()
        // Root redirect
        .route("/", get(handlers::redirect::index))
        // Health check, no owner header required
        .route("/health", get(|| async { axum::http::StatusCode::OK }))
        .nest("/api", api_router)
        // Short-link redirect, registered last so /api/* wins
        .route("/:code", get(handlers::redirect::redirect))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
