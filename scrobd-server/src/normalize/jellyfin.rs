//! Jellyfin webhook adapter (media-server push)
//!
//! Jellyfin's webhook plugin posts PascalCase JSON with tick-based timing
//! (1 tick = 100 ns). Movies and episodes become video scrobbles, audio items
//! become track scrobbles.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::normalize::{parse_timestamp, CanonicalEvent, PlaybackStatus, SourceEvent};
use scrobd_common::media::{MediaIdentity, MediaKind};

const TICKS_PER_SECOND: i64 = 10_000_000;

pub const SOURCE_TAG: &str = "jellyfin";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JellyfinPayload {
    pub notification_type: Option<String>,
    pub item_type: Option<String>,
    pub name: Option<String>,
    pub series_name: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub run_time_ticks: Option<i64>,
    pub playback_position_ticks: Option<i64>,
    /// Template-configured webhooks may report a percentage instead of ticks
    pub position_percent: Option<u8>,
    pub is_paused: Option<bool>,
    pub utc_timestamp: Option<String>,
    #[serde(rename = "Provider_imdb")]
    pub provider_imdb: Option<String>,
    #[serde(rename = "Provider_musicbrainztrack")]
    pub provider_musicbrainz_track: Option<String>,
}

/// Convert a Jellyfin webhook payload into a canonical event
pub fn normalize(payload: &JellyfinPayload, now: DateTime<Utc>) -> Result<SourceEvent> {
    let item_type = payload.item_type.as_deref().unwrap_or_default();
    let (kind, external_id, subtitle) = match item_type {
        "Movie" | "Episode" => (MediaKind::Video, payload.provider_imdb.clone(), payload.series_name.clone()),
        "Audio" => (
            MediaKind::Track,
            payload.provider_musicbrainz_track.clone(),
            payload.artist.clone(),
        ),
        other => {
            return Err(Error::BadPayload(format!(
                "Unsupported Jellyfin item type: '{}'",
                other
            )))
        }
    };

    if payload.name.is_none() && external_id.is_none() {
        return Err(scrobd_common::Error::MissingIdentity(
            "Jellyfin payload has neither Name nor a provider id".to_string(),
        )
        .into());
    }

    let status = match payload.notification_type.as_deref() {
        Some("PlaybackStop") => PlaybackStatus::Stopped,
        _ if payload.is_paused == Some(true) => PlaybackStatus::Paused,
        _ => PlaybackStatus::Resumed,
    };

    let mut event = CanonicalEvent::new(
        parse_timestamp(payload.utc_timestamp.as_deref(), now),
        status,
        SOURCE_TAG,
    );
    event.playback_position_seconds = payload
        .playback_position_ticks
        .map(|ticks| ticks / TICKS_PER_SECOND);
    event.percent_hint = payload.position_percent;
    event.log = Some(json!({
        "notification_type": payload.notification_type,
        "item_type": item_type,
    }));

    Ok(SourceEvent {
        kind,
        identity: MediaIdentity {
            external_id,
            title: payload.name.clone(),
            subtitle,
            run_time_seconds: payload.run_time_ticks.map(|ticks| ticks / TICKS_PER_SECOND),
            ..Default::default()
        },
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie_payload() -> JellyfinPayload {
        serde_json::from_value(json!({
            "NotificationType": "PlaybackProgress",
            "ItemType": "Movie",
            "Name": "Stalker",
            "RunTimeTicks": 3600i64 * TICKS_PER_SECOND,
            "PlaybackPositionTicks": 900i64 * TICKS_PER_SECOND,
            "IsPaused": false,
            "Provider_imdb": "tt0079944"
        }))
        .unwrap()
    }

    #[test]
    fn movie_progress_normalizes_to_video() {
        let event = normalize(&movie_payload(), Utc::now()).unwrap();
        assert_eq!(event.kind, MediaKind::Video);
        assert_eq!(event.identity.external_id.as_deref(), Some("tt0079944"));
        assert_eq!(event.identity.run_time_seconds, Some(3600));
        assert_eq!(event.event.playback_position_seconds, Some(900));
        assert_eq!(event.event.status, PlaybackStatus::Resumed);
    }

    #[test]
    fn position_percent_carries_as_hint() {
        let payload: JellyfinPayload = serde_json::from_value(json!({
            "NotificationType": "PlaybackProgress",
            "ItemType": "Movie",
            "Name": "Stalker",
            "PositionPercent": 42
        }))
        .unwrap();
        let event = normalize(&payload, Utc::now()).unwrap();
        assert_eq!(event.event.percent_hint, Some(42));
        assert_eq!(event.event.playback_position_seconds, None);
    }

    #[test]
    fn playback_stop_maps_to_stopped() {
        let mut payload = movie_payload();
        payload.notification_type = Some("PlaybackStop".to_string());
        let event = normalize(&payload, Utc::now()).unwrap();
        assert_eq!(event.event.status, PlaybackStatus::Stopped);
    }

    #[test]
    fn paused_flag_maps_to_paused() {
        let mut payload = movie_payload();
        payload.is_paused = Some(true);
        let event = normalize(&payload, Utc::now()).unwrap();
        assert_eq!(event.event.status, PlaybackStatus::Paused);
    }

    #[test]
    fn payload_without_identity_is_rejected() {
        let mut payload = movie_payload();
        payload.name = None;
        payload.provider_imdb = None;
        assert!(normalize(&payload, Utc::now()).is_err());
    }

    #[test]
    fn unsupported_item_type_rejected() {
        let mut payload = movie_payload();
        payload.item_type = Some("TvChannel".to_string());
        assert!(normalize(&payload, Utc::now()).is_err());
    }
}
