//! Media catalog types
//!
//! Everything the engine scrobbles implements the `TrackableMedia` capability:
//! identity, run length, completion threshold, and long-play behavior. The
//! concrete kind is carried as a tagged union (`MediaRef`) rather than a row of
//! nullable type-specific references, and kind behavior comes from a static
//! registry instead of runtime string dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Every media kind the tracker knows how to scrobble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Track,
    PodcastEpisode,
    Book,
    VideoGame,
    BoardGame,
    Location,
    WebPage,
    Task,
    LifeEvent,
}

/// Static per-kind behavior: completion threshold, grace padding after the
/// expected natural end, and how long an untouched record stays updatable.
///
/// Audio gets near-zero grace; video gets tens of minutes so a back-to-back
/// replay starts a fresh session instead of bleeding into the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindDefaults {
    pub completion_percent: u8,
    pub grace_seconds: i64,
    pub stale_seconds: i64,
    pub long_play: bool,
}

impl MediaKind {
    pub const ALL: [MediaKind; 10] = [
        MediaKind::Video,
        MediaKind::Track,
        MediaKind::PodcastEpisode,
        MediaKind::Book,
        MediaKind::VideoGame,
        MediaKind::BoardGame,
        MediaKind::Location,
        MediaKind::WebPage,
        MediaKind::Task,
        MediaKind::LifeEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Track => "track",
            MediaKind::PodcastEpisode => "podcast_episode",
            MediaKind::Book => "book",
            MediaKind::VideoGame => "video_game",
            MediaKind::BoardGame => "board_game",
            MediaKind::Location => "location",
            MediaKind::WebPage => "web_page",
            MediaKind::Task => "task",
            MediaKind::LifeEvent => "life_event",
        }
    }

    /// Compile-time kind registry
    pub fn defaults(&self) -> KindDefaults {
        match self {
            MediaKind::Video => KindDefaults {
                completion_percent: 90,
                grace_seconds: 1800,
                stale_seconds: 14400,
                long_play: false,
            },
            MediaKind::Track => KindDefaults {
                completion_percent: 90,
                grace_seconds: 30,
                stale_seconds: 1800,
                long_play: false,
            },
            MediaKind::PodcastEpisode => KindDefaults {
                completion_percent: 90,
                grace_seconds: 300,
                stale_seconds: 14400,
                long_play: false,
            },
            MediaKind::Book => KindDefaults {
                completion_percent: 95,
                grace_seconds: 1800,
                stale_seconds: 86400,
                long_play: true,
            },
            MediaKind::VideoGame => KindDefaults {
                completion_percent: 95,
                grace_seconds: 1800,
                stale_seconds: 86400,
                long_play: true,
            },
            MediaKind::BoardGame => KindDefaults {
                completion_percent: 100,
                grace_seconds: 3600,
                stale_seconds: 86400,
                long_play: false,
            },
            MediaKind::Location => KindDefaults {
                completion_percent: 100,
                grace_seconds: 0,
                stale_seconds: 900,
                long_play: false,
            },
            MediaKind::WebPage => KindDefaults {
                completion_percent: 100,
                grace_seconds: 0,
                stale_seconds: 3600,
                long_play: false,
            },
            MediaKind::Task => KindDefaults {
                completion_percent: 100,
                grace_seconds: 0,
                stale_seconds: 86400,
                long_play: false,
            },
            MediaKind::LifeEvent => KindDefaults {
                completion_percent: 100,
                grace_seconds: 0,
                stale_seconds: 86400,
                long_play: false,
            },
        }
    }

    /// Long-play media accumulates progress across discrete sessions
    pub fn is_long_play(&self) -> bool {
        self.defaults().long_play
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MediaKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown media kind: {}", s)))
    }
}

/// Reference to one concrete media entity: kind tag plus catalog GUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub id: Uuid,
}

impl MediaRef {
    pub fn new(kind: MediaKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A catalog entity the engine can scrobble
///
/// Immutable from the engine's point of view; catalog lookups populate it and
/// metadata refresh happens elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackableMedia {
    pub media_ref: MediaRef,
    pub title: String,
    /// Secondary identity field: artist for tracks, author for books
    pub subtitle: Option<String>,
    /// Stable external catalog key (IMDB id, MBID, URL, rounded lat/lon)
    pub external_id: Option<String>,
    pub run_time_seconds: Option<i64>,
    /// Page count, for paginated long-play media
    pub total_pages: Option<i64>,
    /// Per-media completion override; None falls back to kind/user policy
    pub completion_percent: Option<u8>,
    /// Coordinates, for `MediaKind::Location` only
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl TrackableMedia {
    pub fn kind(&self) -> MediaKind {
        self.media_ref.kind
    }

    pub fn is_long_play(&self) -> bool {
        self.kind().is_long_play()
    }
}

/// Source-specific identity fields used to resolve or create a catalog entity
///
/// At least one of `external_id`, `title`, or a lat/lon pair must be present or
/// resolution fails with `MissingIdentity`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaIdentity {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub run_time_seconds: Option<i64>,
    pub total_pages: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl MediaIdentity {
    pub fn is_empty(&self) -> bool {
        self.external_id.is_none()
            && self.title.is_none()
            && (self.latitude.is_none() || self.longitude.is_none())
    }
}
