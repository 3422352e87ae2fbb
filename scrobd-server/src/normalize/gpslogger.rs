//! GPSLogger adapter (phone location push)
//!
//! GPSLogger posts one fix per request using short field names. Every fix
//! becomes a location event; the location state machine downstream decides
//! whether it opens a new record or just annotates the current one.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::normalize::{parse_timestamp, CanonicalEvent, PlaybackStatus, SourceEvent};
use scrobd_common::media::{MediaIdentity, MediaKind};

pub const SOURCE_TAG: &str = "gpslogger";

#[derive(Debug, Clone, Deserialize)]
pub struct GpsLoggerPayload {
    pub lat: f64,
    pub lon: f64,
    /// Accuracy in meters
    pub acc: Option<f64>,
    /// Altitude in meters
    pub alt: Option<f64>,
    /// Speed in m/s
    pub spd: Option<f64>,
    pub batt: Option<f64>,
    pub time: Option<String>,
}

/// Convert a GPS fix into a canonical location event
pub fn normalize(payload: &GpsLoggerPayload, now: DateTime<Utc>) -> Result<SourceEvent> {
    let mut event = CanonicalEvent::new(
        parse_timestamp(payload.time.as_deref(), now),
        PlaybackStatus::Resumed,
        SOURCE_TAG,
    );
    // The raw fix rides along in the log; the catalog identity only keeps
    // rounded coordinates
    event.log = Some(json!({
        "lat": payload.lat,
        "lon": payload.lon,
        "acc": payload.acc,
        "alt": payload.alt,
        "spd": payload.spd,
        "batt": payload.batt,
    }));

    Ok(SourceEvent {
        kind: MediaKind::Location,
        identity: MediaIdentity {
            latitude: Some(payload.lat),
            longitude: Some(payload.lon),
            ..Default::default()
        },
        event,
    })
}
