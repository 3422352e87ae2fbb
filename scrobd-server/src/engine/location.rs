//! Location reconciliation
//!
//! GPS fixes do not carry playback state; "has the user moved" replaces the
//! status signal. A fix either annotates the open location record or closes it
//! and opens a new one at the new place. The caller already holds the per-user
//! location lock, so finalize-old-plus-create-new is atomic with respect to
//! other fixes.

use serde_json::json;
use tracing::{debug, info};

use crate::error::Result;
use crate::normalize::CanonicalEvent;
use scrobd_common::db::media as catalog;
use scrobd_common::db::records::{self, ScrobbleRecord};
use scrobd_common::db::users::UserProfile;
use scrobd_common::events::ScrobbleEvent;
use scrobd_common::media::TrackableMedia;

use super::Reconciler;

pub(crate) async fn reconcile(
    engine: &Reconciler,
    media: &TrackableMedia,
    profile: &UserProfile,
    event: &CanonicalEvent,
) -> Result<ScrobbleRecord> {
    let db = engine.db();
    let candidate = records::latest_in_progress_location(db, profile.user_id).await?;

    // Same rounded cell: the fix just annotates the open record
    if let Some(current) = candidate.clone() {
        if current.media == media.media_ref {
            return annotate(engine, current, event, None).await;
        }
    }

    let (lat, lon) = match (media.latitude, media.longitude) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => {
            return Err(scrobd_common::Error::MissingIdentity(
                "location media without coordinates".to_string(),
            )
            .into())
        }
    };
    let policy = engine.policy().location;

    // Movement test against the last few known locations, so jitter straddling
    // a rounding boundary does not read as movement
    let history = records::recent_location_history(db, profile.user_id, policy.history_window).await?;
    let mut moved = true;
    for past in &history {
        let past_media = catalog::get_media(db, past.media).await?;
        if let (Some(past_lat), Some(past_lon)) = (past_media.latitude, past_media.longitude) {
            if (past_lat - lat).abs() <= policy.movement_epsilon_degrees
                && (past_lon - lon).abs() <= policy.movement_epsilon_degrees
            {
                moved = false;
                break;
            }
        }
    }

    if !moved {
        if let Some(current) = candidate {
            debug!("Fix within movement epsilon, keeping record {}", current.guid);
            return annotate(engine, current, event, None).await;
        }
        // Nothing open to annotate; fall through and open a record
    } else if let Some(current) = &candidate {
        // Wandering near a named place is one session, not many fragments
        if let Some(place) =
            catalog::find_place_near(db, lat, lon, policy.known_place_radius_degrees).await?
        {
            let radius = place.proximity_degrees.unwrap_or(policy.known_place_radius_degrees);
            let current_media = catalog::get_media(db, current.media).await?;
            let current_near = match (current_media.latitude, current_media.longitude) {
                (Some(cur_lat), Some(cur_lon)) => {
                    (place.latitude - cur_lat).abs() <= radius
                        && (place.longitude - cur_lon).abs() <= radius
                }
                _ => false,
            };
            if current_near {
                debug!("Fix stays near '{}', keeping record {}", place.name, current.guid);
                return annotate(engine, current.clone(), event, Some(&place.name)).await;
            }
        }
    }

    // Real movement: close the open record, then open one at the new location
    if let Some(current) = candidate {
        let current_media = catalog::get_media(db, current.media).await?;
        info!(
            "User {} moved from '{}' to '{}'",
            profile.username, current_media.title, media.title
        );
        engine.force_finish_record(current, &current_media, profile).await?;
    }
    engine.create(media, profile, event).await
}

/// Fold the fix into the open record's log without opening a new session
async fn annotate(
    engine: &Reconciler,
    mut record: ScrobbleRecord,
    event: &CanonicalEvent,
    place: Option<&str>,
) -> Result<ScrobbleRecord> {
    if let Some(entry) = &event.log {
        record.append_log(entry.clone());
    }
    if let Some(place) = place {
        record.append_log(json!({ "near_place": place }));
    }
    record.updated_at = engine.now();
    records::update(engine.db(), &record).await?;

    engine
        .events()
        .emit(ScrobbleEvent::ScrobbleUpdated {
            scrobble_id: record.guid,
            media: record.media,
            user_id: record.user_id,
            percent_played: 0,
            timestamp: record.updated_at,
        })
        .ok();
    Ok(record)
}
