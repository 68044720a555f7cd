//! CrewComms Share Backend
//!
//! The gateway service behind the browser share editor: resolves passcode-
//! gated share links and synchronizes roster edits against the record store
//! with optimistic concurrency.

mod api;
mod auth;
mod config;
mod errors;
mod loader;
mod models;
mod session;
mod store;
mod sync;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use dashmap::DashMap;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use store::{RecordStore, SqliteStore};
use sync::SyncEngine;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
    /// One sync engine per unlocked share.
    pub shares: Arc<DashMap<String, Arc<SyncEngine>>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting CrewComms Share Backend");
    tracing::info!("Record store path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    if config.require_signin {
        tracing::info!("Platform sign-in is required for edits");
    }

    // Initialize the record store
    let pool = store::init_database(&config.db_path).await?;
    let record_store: Arc<dyn RecordStore> = Arc::new(SqliteStore::new(pool));

    // Create application state
    let state = AppState {
        config: Arc::new(config.clone()),
        store: record_store,
        shares: Arc::new(DashMap::new()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API routes
    let api_routes = Router::new()
        // Share lifecycle
        .route("/shares/{id}", get(api::resolve_share))
        .route("/shares/{id}/passcode", post(api::verify_share_passcode))
        .route("/shares/{id}/signin", post(api::signin))
        .route("/shares/{id}/snapshot", get(api::share_snapshot))
        .route("/shares/{id}/status", get(api::share_status))
        // Edit intents
        .route(
            "/shares/{id}/people/{record}/fields",
            put(api::edit_person_field),
        )
        .route(
            "/shares/{id}/people/{record}/channels/{index}",
            put(api::edit_person_channel),
        );

    // Health check (no gate)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
