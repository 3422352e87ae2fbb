//! Last.fm history import
//!
//! Pulls `user.getrecenttracks` pages from the Last.fm REST API and feeds the
//! listens through the engine. Run times are not part of the recent-tracks
//! payload, so imported listens lean on the unknown-run-time policy.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::engine::Reconciler;
use crate::error::{Error, Result};
use crate::imports::{run_import, ImportEntry, ImportOutcome};
use crate::normalize::{CanonicalEvent, PlaybackStatus};
use scrobd_common::media::{MediaIdentity, MediaKind};

pub const SOURCE_TAG: &str = "lastfm";

const DEFAULT_API_ROOT: &str = "https://ws.audioscrobbler.com/2.0/";
const PAGE_SIZE: usize = 200;

pub struct LastfmClient {
    http: reqwest::Client,
    api_root: String,
    api_key: String,
}

impl LastfmClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_api_root(api_key, DEFAULT_API_ROOT)
    }

    /// Point at a different API root (tests use a local stub)
    pub fn with_api_root(api_key: &str, api_root: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_root: api_root.to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn fetch_page(&self, username: &str, page: usize) -> Result<Value> {
        let response = self
            .http
            .get(&self.api_root)
            .query(&[
                ("method", "user.getrecenttracks"),
                ("user", username),
                ("api_key", &self.api_key),
                ("format", "json"),
                ("limit", &PAGE_SIZE.to_string()),
                ("page", &page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::RemoteFetch(format!("Last.fm request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::RemoteFetch(format!(
                "Last.fm returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::RemoteFetch(format!("Last.fm response unreadable: {}", e)))
    }

    /// Fetch up to `max_pages` of recent listens, oldest bound by the API
    pub async fn fetch_recent(&self, username: &str, max_pages: usize) -> Result<Vec<ImportEntry>> {
        let mut entries = Vec::new();
        for page in 1..=max_pages.max(1) {
            let body = self.fetch_page(username, page).await?;
            let total_pages = body["recenttracks"]["@attr"]["totalPages"]
                .as_str()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(1);

            entries.extend(parse_recent_tracks(&body)?);
            debug!("Last.fm page {}/{} fetched", page, total_pages);
            if page >= total_pages {
                break;
            }
        }
        Ok(entries)
    }
}

/// Parse one recent-tracks response body into import entries
///
/// The now-playing entry has no date and is skipped; it is not history yet.
pub fn parse_recent_tracks(body: &Value) -> Result<Vec<ImportEntry>> {
    let tracks = match &body["recenttracks"]["track"] {
        Value::Array(tracks) => tracks.as_slice(),
        // A single listen comes back as a bare object
        track @ Value::Object(_) => std::slice::from_ref(track),
        _ => {
            return Err(Error::RemoteFetch(
                "Last.fm response missing recenttracks.track".to_string(),
            ))
        }
    };

    let mut entries = Vec::new();
    for track in tracks {
        let Some(uts) = track["date"]["uts"].as_str().and_then(|s| s.parse::<i64>().ok())
        else {
            continue;
        };
        let Some(timestamp) = chrono::DateTime::from_timestamp(uts, 0) else {
            continue;
        };

        let title = track["name"].as_str().map(|s| s.to_string());
        let artist = track["artist"]["#text"]
            .as_str()
            .or_else(|| track["artist"]["name"].as_str())
            .map(|s| s.to_string());
        let mbid = track["mbid"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        if title.is_none() && mbid.is_none() {
            continue;
        }

        entries.push(ImportEntry {
            kind: MediaKind::Track,
            identity: MediaIdentity {
                external_id: mbid,
                title,
                subtitle: artist,
                ..Default::default()
            },
            event: CanonicalEvent::new(timestamp, PlaybackStatus::Stopped, SOURCE_TAG),
        });
    }
    Ok(entries)
}

/// Import a user's Last.fm listening history
pub async fn import_history(
    engine: &Reconciler,
    client: &LastfmClient,
    username: &str,
    user_id: Uuid,
    max_pages: usize,
    force: bool,
) -> Result<ImportOutcome> {
    let entries = client.fetch_recent(username, max_pages).await?;
    if entries.is_empty() {
        return Err(Error::ImportSource(format!(
            "Last.fm user '{}' has no importable listens",
            username
        )));
    }
    run_import(engine, SOURCE_TAG, user_id, entries, force).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recent_tracks_parse_and_now_playing_is_skipped() {
        let body = json!({
            "recenttracks": {
                "track": [
                    {
                        "name": "Days Like These",
                        "artist": { "#text": "Low" },
                        "mbid": "",
                        "@attr": { "nowplaying": "true" }
                    },
                    {
                        "name": "Same in the End",
                        "artist": { "#text": "Sublime" },
                        "mbid": "track-mbid",
                        "date": { "uts": "1714557600" }
                    }
                ],
                "@attr": { "totalPages": "1" }
            }
        });

        let entries = parse_recent_tracks(&body).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identity.title.as_deref(), Some("Same in the End"));
        assert_eq!(entries[0].identity.external_id.as_deref(), Some("track-mbid"));
        assert_eq!(entries[0].event.timestamp.timestamp(), 1_714_557_600);
    }

    #[test]
    fn missing_track_list_is_an_error() {
        let err = parse_recent_tracks(&json!({ "error": 6 })).unwrap_err();
        assert!(matches!(err, Error::RemoteFetch(_)));
    }
}
