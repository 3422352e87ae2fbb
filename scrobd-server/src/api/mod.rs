//! REST API for the scrobble server
//!
//! Webhook ingestion, record listing and lifecycle actions, import
//! launch/undo, the zombie sweep, and an SSE event stream.

pub mod handlers;
pub mod webhooks;

use axum::{
    extract::State,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Reconciler;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Reconciler>,
    pub port: u16,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Webhook ingestion
                .route("/webhook/jellyfin", post(webhooks::jellyfin))
                .route("/webhook/mopidy", post(webhooks::mopidy))
                .route("/webhook/gpslogger", post(webhooks::gpslogger))
                // Scrobble listing and lifecycle
                .route("/scrobbles", get(handlers::list_scrobbles))
                .route("/scrobbles/:guid", get(handlers::get_scrobble))
                .route("/scrobbles/:guid/finish", post(handlers::finish_scrobble))
                .route("/scrobbles/:guid", delete(handlers::cancel_scrobble))
                // Imports
                .route("/imports/audioscrobbler", post(handlers::import_audioscrobbler))
                .route("/imports/koreader", post(handlers::import_koreader))
                .route("/imports/lastfm", post(handlers::import_lastfm))
                .route("/imports/:guid/undo", post(handlers::undo_import))
                // Background jobs
                .route("/jobs/zombie-sweep", post(handlers::zombie_sweep))
                // SSE events
                .route("/events", get(handlers::event_stream)),
        )
        .layer(TraceLayer::new_for_http())
        // CORS for local clients
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "module": "scrobd-server",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.port,
    }))
}
