//! Event normalization
//!
//! Per-source adapters convert heterogeneous webhook/import payloads into one
//! canonical event shape the reconciliation engine understands. Identity
//! resolution happens later via the catalog's find-or-create; adapters only
//! extract the identity hint.

pub mod gpslogger;
pub mod jellyfin;
pub mod mopidy;

use chrono::{DateTime, TimeZone, Utc};
use scrobd_common::media::{MediaIdentity, MediaKind};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Status signal carried by a playback event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Resumed,
    Paused,
    Stopped,
}

impl FromStr for PlaybackStatus {
    type Err = scrobd_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resumed" | "playing" | "started" | "resume" | "start" => Ok(PlaybackStatus::Resumed),
            "paused" | "pause" => Ok(PlaybackStatus::Paused),
            "stopped" | "stop" | "ended" | "finished" => Ok(PlaybackStatus::Stopped),
            other => Err(scrobd_common::Error::InvalidInput(format!(
                "Unknown playback status: {}",
                other
            ))),
        }
    }
}

/// Canonical playback event, source-independent
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    pub timestamp: DateTime<Utc>,
    pub playback_position_seconds: Option<i64>,
    /// Some sources report progress as a percentage instead of a position
    pub percent_hint: Option<u8>,
    pub status: PlaybackStatus,
    pub source: String,
    /// Pages covered by this event's session, for paginated long-play media
    pub pages_read: Option<i64>,
    /// Structured provenance appended to the record's log
    pub log: Option<serde_json::Value>,
}

impl CanonicalEvent {
    pub fn new(timestamp: DateTime<Utc>, status: PlaybackStatus, source: &str) -> Self {
        Self {
            timestamp,
            playback_position_seconds: None,
            percent_hint: None,
            status,
            source: source.to_string(),
            pages_read: None,
            log: None,
        }
    }
}

/// Adapter output: where to look the media up, plus the canonical event
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub kind: MediaKind,
    pub identity: MediaIdentity,
    pub event: CanonicalEvent,
}

/// Parse a source timestamp, falling back to `now`
///
/// Position-tracking sources regularly omit or mis-format timestamps; a bad
/// timestamp must not drop the event.
pub fn parse_timestamp(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw else { return now };
    let raw = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Utc.from_utc_datetime(&parsed);
    }
    if let Ok(epoch) = raw.parse::<i64>() {
        if let Some(parsed) = Utc.timestamp_opt(epoch, 0).single() {
            return parsed;
        }
    }

    now
}
