//! Webhook ingestion endpoints
//!
//! One endpoint per source family; each normalizes its payload and hands the
//! canonical event to the engine. The acting user comes from the `user` query
//! parameter and defaults to the anonymous user.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::api::handlers::{describe, ScrobbleInfo};
use crate::api::AppState;
use crate::error::ApiError;
use crate::normalize;
use scrobd_common::db::users::anonymous_user_id;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user: Option<Uuid>,
}

impl UserQuery {
    fn user_id(&self) -> Uuid {
        self.user.unwrap_or_else(anonymous_user_id)
    }
}

/// POST /api/v1/webhook/jellyfin
pub async fn jellyfin(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
    Json(payload): Json<normalize::jellyfin::JellyfinPayload>,
) -> Result<Json<ScrobbleInfo>, ApiError> {
    debug!("Jellyfin webhook: {:?}", payload.notification_type);
    let source_event = normalize::jellyfin::normalize(&payload, state.engine.now())?;
    let record = state.engine.ingest(params.user_id(), &source_event).await?;
    Ok(Json(describe(&state, &record).await?))
}

/// POST /api/v1/webhook/mopidy
pub async fn mopidy(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
    Json(payload): Json<normalize::mopidy::MopidyPayload>,
) -> Result<Json<ScrobbleInfo>, ApiError> {
    debug!("Mopidy webhook: {:?}", payload.status);
    let source_event = normalize::mopidy::normalize(&payload, state.engine.now())?;
    let record = state.engine.ingest(params.user_id(), &source_event).await?;
    Ok(Json(describe(&state, &record).await?))
}

/// POST /api/v1/webhook/gpslogger
pub async fn gpslogger(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
    Json(payload): Json<normalize::gpslogger::GpsLoggerPayload>,
) -> Result<Json<ScrobbleInfo>, ApiError> {
    let source_event = normalize::gpslogger::normalize(&payload, state.engine.now())?;
    let record = state.engine.ingest(params.user_id(), &source_event).await?;
    Ok(Json(describe(&state, &record).await?))
}
