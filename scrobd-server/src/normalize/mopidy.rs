//! Mopidy webhook adapter (local-player push)
//!
//! A small Mopidy frontend posts snake_case JSON per track event: name/artist
//! identity, run time in whole seconds, playback time in milliseconds, and a
//! plain status string.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::normalize::{CanonicalEvent, SourceEvent};
use scrobd_common::media::{MediaIdentity, MediaKind};

pub const SOURCE_TAG: &str = "mopidy";

#[derive(Debug, Clone, Deserialize)]
pub struct MopidyPayload {
    /// Track title; some frontend versions send `name` instead
    #[serde(alias = "name")]
    pub track: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Run time in seconds
    pub run_time: Option<i64>,
    /// Elapsed playback in milliseconds
    pub playback_time_ticks: Option<i64>,
    pub status: Option<String>,
    pub mopidy_uri: Option<String>,
}

/// Convert a Mopidy track payload into a canonical event
pub fn normalize(payload: &MopidyPayload, now: DateTime<Utc>) -> Result<SourceEvent> {
    let title = payload.track.clone();
    if title.is_none() && payload.mopidy_uri.is_none() {
        return Err(scrobd_common::Error::MissingIdentity(
            "Mopidy payload has neither track nor uri".to_string(),
        )
        .into());
    }
    if payload.artist.is_none() && payload.mopidy_uri.is_none() {
        return Err(scrobd_common::Error::MissingIdentity(
            "Mopidy payload has no artist".to_string(),
        )
        .into());
    }

    let status = payload
        .status
        .as_deref()
        .unwrap_or("resumed")
        .parse()
        .map_err(|e| Error::BadPayload(format!("{}", e)))?;

    // Mopidy never timestamps its events; they are live
    let mut event = CanonicalEvent::new(now, status, SOURCE_TAG);
    event.playback_position_seconds = payload.playback_time_ticks.map(|ms| ms / 1000);

    Ok(SourceEvent {
        kind: MediaKind::Track,
        identity: MediaIdentity {
            external_id: payload.mopidy_uri.clone(),
            title,
            subtitle: payload.artist.clone(),
            run_time_seconds: payload.run_time,
            ..Default::default()
        },
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::PlaybackStatus;
    use serde_json::json;

    #[test]
    fn track_event_normalizes() {
        let payload: MopidyPayload = serde_json::from_value(json!({
            "track": "Same in the End",
            "artist": "Sublime",
            "run_time": 156,
            "status": "resumed"
        }))
        .unwrap();

        let event = normalize(&payload, Utc::now()).unwrap();
        assert_eq!(event.kind, MediaKind::Track);
        assert_eq!(event.identity.title.as_deref(), Some("Same in the End"));
        assert_eq!(event.identity.subtitle.as_deref(), Some("Sublime"));
        assert_eq!(event.identity.run_time_seconds, Some(156));
        assert_eq!(event.event.status, PlaybackStatus::Resumed);
    }

    #[test]
    fn playback_time_converts_ms_to_seconds() {
        let payload: MopidyPayload = serde_json::from_value(json!({
            "track": "t", "artist": "a", "playback_time_ticks": 45500
        }))
        .unwrap();
        let event = normalize(&payload, Utc::now()).unwrap();
        assert_eq!(event.event.playback_position_seconds, Some(45));
    }

    #[test]
    fn missing_artist_rejected() {
        let payload: MopidyPayload =
            serde_json::from_value(json!({ "track": "orphan" })).unwrap();
        assert!(normalize(&payload, Utc::now()).is_err());
    }
}
