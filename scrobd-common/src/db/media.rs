//! Media catalog access
//!
//! Find-or-create by natural external key, with a deterministic first-match
//! policy when several rows plausibly match (warn, never fail the pipeline).

use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::media::{MediaIdentity, MediaKind, MediaRef, TrackableMedia};

/// Decimal places kept when a lat/lon pair becomes a location's external key.
/// Four places is roughly 11 m, below the movement epsilon.
const LOCATION_KEY_PRECISION: f64 = 10_000.0;

fn row_to_media(row: &SqliteRow) -> Result<TrackableMedia> {
    let guid: String = row.try_get("guid")?;
    let kind_str: String = row.try_get("kind")?;
    let kind: MediaKind = kind_str.parse()?;
    let completion: Option<i64> = row.try_get("completion_percent")?;

    Ok(TrackableMedia {
        media_ref: MediaRef::new(
            kind,
            Uuid::parse_str(&guid).map_err(|e| Error::Internal(format!("Bad media guid: {}", e)))?,
        ),
        title: row.try_get("title")?,
        subtitle: row.try_get("subtitle")?,
        external_id: row.try_get("external_id")?,
        run_time_seconds: row.try_get("run_time_seconds")?,
        total_pages: row.try_get("total_pages")?,
        completion_percent: completion.map(|p| p.clamp(0, 100) as u8),
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
    })
}

/// External key used for a location's catalog identity
pub fn location_external_id(latitude: f64, longitude: f64) -> String {
    let lat = (latitude * LOCATION_KEY_PRECISION).round() / LOCATION_KEY_PRECISION;
    let lon = (longitude * LOCATION_KEY_PRECISION).round() / LOCATION_KEY_PRECISION;
    format!("{:.4},{:.4}", lat, lon)
}

/// Fetch one media entity by reference
pub async fn get_media(db: &Pool<Sqlite>, media_ref: MediaRef) -> Result<TrackableMedia> {
    let row = sqlx::query("SELECT * FROM media WHERE guid = ? AND kind = ?")
        .bind(media_ref.id.to_string())
        .bind(media_ref.kind.as_str())
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("media {}", media_ref)))?;

    row_to_media(&row)
}

/// Idempotent upsert by natural external key
///
/// Resolution order: external id, then (title, subtitle). Several matches pick
/// the oldest row deterministically and log a warning. An identity with no
/// usable fields is rejected with `MissingIdentity` and nothing is persisted.
pub async fn find_or_create_media(
    db: &Pool<Sqlite>,
    kind: MediaKind,
    identity: &MediaIdentity,
) -> Result<TrackableMedia> {
    let mut identity = identity.clone();

    // Locations key on rounded coordinates
    if kind == MediaKind::Location {
        match (identity.latitude, identity.longitude) {
            (Some(lat), Some(lon)) => {
                identity.external_id = Some(location_external_id(lat, lon));
                if identity.title.is_none() {
                    identity.title = identity.external_id.clone();
                }
            }
            _ => {
                return Err(Error::MissingIdentity(
                    "location event without lat/lon".to_string(),
                ))
            }
        }
    }

    if identity.is_empty() {
        return Err(Error::MissingIdentity(format!(
            "{} event carries no external id, title, or coordinates",
            kind
        )));
    }

    if let Some(found) = find_media(db, kind, &identity).await? {
        return Ok(found);
    }

    let guid = Uuid::new_v4();
    let title = identity
        .title
        .clone()
        .or_else(|| identity.external_id.clone())
        .ok_or_else(|| Error::MissingIdentity(format!("{} event has no title", kind)))?;

    sqlx::query(
        r#"
        INSERT INTO media (guid, kind, title, subtitle, external_id,
                           run_time_seconds, total_pages, latitude, longitude)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(guid.to_string())
    .bind(kind.as_str())
    .bind(&title)
    .bind(&identity.subtitle)
    .bind(&identity.external_id)
    .bind(identity.run_time_seconds)
    .bind(identity.total_pages)
    .bind(identity.latitude)
    .bind(identity.longitude)
    .execute(db)
    .await?;

    debug!("Created {} media '{}' ({})", kind, title, guid);
    get_media(db, MediaRef::new(kind, guid)).await
}

async fn find_media(
    db: &Pool<Sqlite>,
    kind: MediaKind,
    identity: &MediaIdentity,
) -> Result<Option<TrackableMedia>> {
    let rows = if let Some(external_id) = &identity.external_id {
        sqlx::query("SELECT * FROM media WHERE kind = ? AND external_id = ? ORDER BY created_at, guid")
            .bind(kind.as_str())
            .bind(external_id)
            .fetch_all(db)
            .await?
    } else if let Some(title) = &identity.title {
        match &identity.subtitle {
            Some(subtitle) => {
                sqlx::query(
                    "SELECT * FROM media WHERE kind = ? AND title = ? AND subtitle = ? ORDER BY created_at, guid",
                )
                .bind(kind.as_str())
                .bind(title)
                .bind(subtitle)
                .fetch_all(db)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM media WHERE kind = ? AND title = ? ORDER BY created_at, guid")
                    .bind(kind.as_str())
                    .bind(title)
                    .fetch_all(db)
                    .await?
            }
        }
    } else {
        Vec::new()
    };

    if rows.len() > 1 {
        // Availability over precision: first deterministically-ordered match
        warn!(
            "Ambiguous {} match ({} candidates) for {:?}, picking oldest",
            kind,
            rows.len(),
            identity.title.as_deref().or(identity.external_id.as_deref())
        );
    }

    match rows.first() {
        Some(row) => Ok(Some(row_to_media(row)?)),
        None => Ok(None),
    }
}

/// A named place a user registered (home, office, a landmark)
#[derive(Debug, Clone)]
pub struct Place {
    pub guid: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub proximity_degrees: Option<f64>,
}

/// Find a known named place within `default_radius` (or the place's own
/// proximity override) of the given fix
pub async fn find_place_near(
    db: &Pool<Sqlite>,
    latitude: f64,
    longitude: f64,
    default_radius: f64,
) -> Result<Option<Place>> {
    let rows = sqlx::query("SELECT guid, name, latitude, longitude, proximity_degrees FROM places")
        .fetch_all(db)
        .await?;

    for row in rows {
        let guid: String = row.try_get("guid")?;
        let lat: f64 = row.try_get("latitude")?;
        let lon: f64 = row.try_get("longitude")?;
        let proximity: Option<f64> = row.try_get("proximity_degrees")?;
        let radius = proximity.unwrap_or(default_radius);

        if (lat - latitude).abs() <= radius && (lon - longitude).abs() <= radius {
            return Ok(Some(Place {
                guid: Uuid::parse_str(&guid)
                    .map_err(|e| Error::Internal(format!("Bad place guid: {}", e)))?,
                name: row.try_get("name")?,
                latitude: lat,
                longitude: lon,
                proximity_degrees: proximity,
            }));
        }
    }

    Ok(None)
}

/// Register a named place
pub async fn create_place(
    db: &Pool<Sqlite>,
    name: &str,
    latitude: f64,
    longitude: f64,
    proximity_degrees: Option<f64>,
) -> Result<Place> {
    let guid = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO places (guid, name, latitude, longitude, proximity_degrees) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(guid.to_string())
    .bind(name)
    .bind(latitude)
    .bind(longitude)
    .bind(proximity_degrees)
    .execute(db)
    .await?;

    Ok(Place {
        guid,
        name: name.to_string(),
        latitude,
        longitude,
        proximity_degrees,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    fn track_identity(title: &str, artist: &str) -> MediaIdentity {
        MediaIdentity {
            title: Some(title.to_string()),
            subtitle: Some(artist.to_string()),
            run_time_seconds: Some(156),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let db = init_memory_database().await.unwrap();
        let identity = track_identity("Same in the End", "Sublime");

        let first = find_or_create_media(&db, MediaKind::Track, &identity)
            .await
            .unwrap();
        let second = find_or_create_media(&db, MediaKind::Track, &identity)
            .await
            .unwrap();
        assert_eq!(first.media_ref, second.media_ref);
    }

    #[tokio::test]
    async fn empty_identity_rejected() {
        let db = init_memory_database().await.unwrap();
        let err = find_or_create_media(&db, MediaKind::Track, &MediaIdentity::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingIdentity(_)));
    }

    #[tokio::test]
    async fn location_without_coordinates_rejected() {
        let db = init_memory_database().await.unwrap();
        let identity = MediaIdentity {
            title: Some("somewhere".to_string()),
            ..Default::default()
        };
        let err = find_or_create_media(&db, MediaKind::Location, &identity)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingIdentity(_)));
    }

    #[tokio::test]
    async fn nearby_fixes_share_location_media() {
        let db = init_memory_database().await.unwrap();
        let a = find_or_create_media(
            &db,
            MediaKind::Location,
            &MediaIdentity {
                latitude: Some(52.37000),
                longitude: Some(4.89000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        // Fourth-decimal rounding maps a 0.00001-degree wobble to the same key
        let b = find_or_create_media(
            &db,
            MediaKind::Location,
            &MediaIdentity {
                latitude: Some(52.37001),
                longitude: Some(4.89001),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(a.media_ref, b.media_ref);
    }

    #[tokio::test]
    async fn ambiguous_title_picks_oldest() {
        let db = init_memory_database().await.unwrap();
        // Two rows with the same title/artist, inserted directly
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        for (guid, created) in [(older, "2020-01-01"), (newer, "2023-01-01")] {
            sqlx::query(
                "INSERT INTO media (guid, kind, title, subtitle, created_at) VALUES (?, 'track', 'Dup', 'Band', ?)",
            )
            .bind(guid.to_string())
            .bind(created)
            .execute(&db)
            .await
            .unwrap();
        }

        let found = find_or_create_media(&db, MediaKind::Track, &track_identity("Dup", "Band"))
            .await
            .unwrap();
        assert_eq!(found.media_ref.id, older);
    }

    #[tokio::test]
    async fn place_proximity_lookup() {
        let db = init_memory_database().await.unwrap();
        create_place(&db, "home", 52.370, 4.890, None).await.unwrap();

        let hit = find_place_near(&db, 52.3705, 4.8905, 0.002).await.unwrap();
        assert_eq!(hit.unwrap().name, "home");

        let miss = find_place_near(&db, 52.5, 4.9, 0.002).await.unwrap();
        assert!(miss.is_none());
    }
}
