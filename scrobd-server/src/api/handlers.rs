//! HTTP request handlers
//!
//! Record listing and lifecycle actions, import launch/undo, the zombie
//! sweep, and the SSE event stream.

use std::path::PathBuf;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::ApiError;
use crate::imports;
use crate::jobs;
use scrobd_common::db::media as catalog;
use scrobd_common::db::records::{self, ScrobbleRecord};
use scrobd_common::db::users::anonymous_user_id;
use scrobd_common::events::ScrobbleEvent;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ScrobbleInfo {
    pub guid: Uuid,
    pub media_kind: String,
    pub media_id: Uuid,
    pub media_title: String,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub stop_timestamp: Option<DateTime<Utc>>,
    pub playback_position_seconds: Option<i64>,
    pub percent_played: u8,
    pub in_progress: bool,
    pub is_paused: bool,
    pub played_to_completion: bool,
    pub long_play_seconds: Option<i64>,
    pub long_play_pages: Option<i64>,
    pub long_play_complete: Option<bool>,
    pub book_pages_read: Option<i64>,
    pub source: String,
    pub timezone: String,
}

#[derive(Debug, Serialize)]
pub struct ScrobbleListResponse {
    pub scrobbles: Vec<ScrobbleInfo>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub user: Option<Uuid>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FileImportRequest {
    pub path: PathBuf,
    pub user: Option<Uuid>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct LastfmImportRequest {
    pub username: String,
    pub api_key: String,
    pub user: Option<Uuid>,
    pub max_pages: Option<usize>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub status: String,
    pub job_id: Uuid,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize, Default)]
pub struct DryRunRequest {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct UndoResponse {
    pub status: String,
    pub job_id: Uuid,
    pub candidates: usize,
    pub deleted: u64,
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub status: String,
    pub candidates: usize,
    pub deleted: u64,
    pub dry_run: bool,
}

/// Expand a record into its API shape, deriving percent against its media
pub async fn describe(
    state: &AppState,
    record: &ScrobbleRecord,
) -> crate::error::Result<ScrobbleInfo> {
    let media = catalog::get_media(state.engine.db(), record.media).await?;
    let percent = record.percent_played(
        &media,
        state.engine.policy().assume_complete_when_runtime_unknown,
    );
    Ok(ScrobbleInfo {
        guid: record.guid,
        media_kind: record.media.kind.to_string(),
        media_id: record.media.id,
        media_title: media.title,
        user_id: record.user_id,
        timestamp: record.timestamp,
        stop_timestamp: record.stop_timestamp,
        playback_position_seconds: record.playback_position_seconds,
        percent_played: percent,
        in_progress: record.in_progress,
        is_paused: record.is_paused,
        played_to_completion: record.played_to_completion,
        long_play_seconds: record.long_play_seconds,
        long_play_pages: record.long_play_pages,
        long_play_complete: record.long_play_complete,
        book_pages_read: record.book_pages_read,
        source: record.source.clone(),
        timezone: record.timezone.clone(),
    })
}

// ============================================================================
// Scrobble Endpoints
// ============================================================================

/// GET /api/v1/scrobbles - recent records, newest first
pub async fn list_scrobbles(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<ScrobbleListResponse>, ApiError> {
    let limit = params.limit.unwrap_or(50).min(500);
    let rows = records::recent(state.engine.db(), params.user, limit).await?;

    let mut scrobbles = Vec::with_capacity(rows.len());
    for record in &rows {
        scrobbles.push(describe(&state, record).await?);
    }
    Ok(Json(ScrobbleListResponse { scrobbles }))
}

/// GET /api/v1/scrobbles/:guid
pub async fn get_scrobble(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
) -> Result<Json<ScrobbleInfo>, ApiError> {
    let record = records::get(state.engine.db(), guid).await?;
    Ok(Json(describe(&state, &record).await?))
}

/// POST /api/v1/scrobbles/:guid/finish - forcibly close a record
pub async fn finish_scrobble(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
) -> Result<Json<ScrobbleInfo>, ApiError> {
    info!("Force-finishing scrobble {}", guid);
    let record = state.engine.force_finish(guid).await?;
    Ok(Json(describe(&state, &record).await?))
}

/// DELETE /api/v1/scrobbles/:guid - cancel and hard-delete a record
pub async fn cancel_scrobble(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    info!("Cancelling scrobble {}", guid);
    state.engine.cancel(guid).await?;
    Ok(Json(StatusResponse {
        status: "cancelled".to_string(),
    }))
}

// ============================================================================
// Import Endpoints
// ============================================================================

/// POST /api/v1/imports/audioscrobbler
pub async fn import_audioscrobbler(
    State(state): State<AppState>,
    Json(request): Json<FileImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let user = request.user.unwrap_or_else(anonymous_user_id);
    let outcome = imports::audioscrobbler::import_file(
        &state.engine,
        &request.path,
        user,
        request.force,
    )
    .await?;
    Ok(Json(import_response(outcome)))
}

/// POST /api/v1/imports/koreader
pub async fn import_koreader(
    State(state): State<AppState>,
    Json(request): Json<FileImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let user = request.user.unwrap_or_else(anonymous_user_id);
    let outcome =
        imports::koreader::import_file(&state.engine, &request.path, user, request.force).await?;
    Ok(Json(import_response(outcome)))
}

/// POST /api/v1/imports/lastfm
pub async fn import_lastfm(
    State(state): State<AppState>,
    Json(request): Json<LastfmImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let user = request.user.unwrap_or_else(anonymous_user_id);
    let client = imports::lastfm::LastfmClient::new(&request.api_key);
    let outcome = imports::lastfm::import_history(
        &state.engine,
        &client,
        &request.username,
        user,
        request.max_pages.unwrap_or(10),
        request.force,
    )
    .await?;
    Ok(Json(import_response(outcome)))
}

fn import_response(outcome: imports::ImportOutcome) -> ImportResponse {
    ImportResponse {
        status: "finished".to_string(),
        job_id: outcome.job_guid,
        created: outcome.created,
        skipped: outcome.skipped,
        failed: outcome.failed,
    }
}

/// POST /api/v1/imports/:guid/undo
pub async fn undo_import(
    State(state): State<AppState>,
    Path(guid): Path<Uuid>,
    Json(request): Json<DryRunRequest>,
) -> Result<Json<UndoResponse>, ApiError> {
    let outcome = imports::undo_import(&state.engine, guid, request.dry_run).await?;
    Ok(Json(UndoResponse {
        status: "ok".to_string(),
        job_id: outcome.job_guid,
        candidates: outcome.candidates,
        deleted: outcome.deleted,
        dry_run: request.dry_run,
    }))
}

// ============================================================================
// Job Endpoints
// ============================================================================

/// POST /api/v1/jobs/zombie-sweep
pub async fn zombie_sweep(
    State(state): State<AppState>,
    Json(request): Json<DryRunRequest>,
) -> Result<Json<SweepResponse>, ApiError> {
    let outcome = jobs::zombie_sweep(&state.engine, request.dry_run).await?;
    Ok(Json(SweepResponse {
        status: "ok".to_string(),
        candidates: outcome.candidates,
        deleted: outcome.deleted,
        dry_run: request.dry_run,
    }))
}

// ============================================================================
// SSE Events
// ============================================================================

/// GET /api/v1/events - SSE lifecycle event stream
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    debug!("New SSE client connected");
    let mut rx = state.engine.events().subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        yield Ok(Event::default().event(event_name(&event)).data(json));
                    }
                    Err(e) => warn!("Failed to serialize event: {}", e),
                },
                Err(RecvError::Lagged(missed)) => {
                    warn!("SSE client lagged, {} events dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

fn event_name(event: &ScrobbleEvent) -> &'static str {
    match event {
        ScrobbleEvent::ScrobbleStarted { .. } => "ScrobbleStarted",
        ScrobbleEvent::ScrobbleUpdated { .. } => "ScrobbleUpdated",
        ScrobbleEvent::ScrobbleFinished { .. } => "ScrobbleFinished",
        ScrobbleEvent::ScrobbleCancelled { .. } => "ScrobbleCancelled",
        ScrobbleEvent::ImportStarted { .. } => "ImportStarted",
        ScrobbleEvent::ImportFinished { .. } => "ImportFinished",
    }
}
