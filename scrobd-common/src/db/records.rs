//! Scrobble record storage
//!
//! One row per (user, media, session). `timestamp` is written once at creation
//! and never touched by updates; every other mutable field goes through a
//! single-statement update. Percent played is always derived, never stored.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::media::{MediaKind, MediaRef, TrackableMedia};

/// The central entity: one session of a user engaging with a piece of media
#[derive(Debug, Clone, PartialEq)]
pub struct ScrobbleRecord {
    /// Surrogate row id (0 until persisted)
    pub id: i64,
    /// External-stable identifier
    pub guid: Uuid,
    pub media: MediaRef,
    pub user_id: Uuid,
    /// Session start; immutable once set
    pub timestamp: DateTime<Utc>,
    /// Session end, or last-seen time while paused
    pub stop_timestamp: Option<DateTime<Utc>>,
    pub playback_position_seconds: Option<i64>,
    pub in_progress: bool,
    pub is_paused: bool,
    pub played_to_completion: bool,
    /// Cumulative seconds across the long-play session chain
    pub long_play_seconds: Option<i64>,
    /// Cumulative pages across the long-play session chain
    pub long_play_pages: Option<i64>,
    /// Tri-state: None = not yet evaluated, Some(false) = chain still going,
    /// Some(true) = media finished across all sessions
    pub long_play_complete: Option<bool>,
    /// Pages read within this session alone
    pub book_pages_read: Option<i64>,
    pub source: String,
    /// Free-form structured side channel (GPS fixes, player scores)
    pub log: serde_json::Value,
    pub timezone: String,
    pub updated_at: DateTime<Utc>,
}

impl ScrobbleRecord {
    /// Fresh in-progress record for a new session
    pub fn start(
        media: MediaRef,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
        source: &str,
        timezone: &str,
    ) -> Self {
        Self {
            id: 0,
            guid: Uuid::new_v4(),
            media,
            user_id,
            timestamp,
            stop_timestamp: None,
            playback_position_seconds: None,
            in_progress: true,
            is_paused: false,
            played_to_completion: false,
            long_play_seconds: None,
            long_play_pages: None,
            long_play_complete: None,
            book_pages_read: None,
            source: source.to_string(),
            log: serde_json::Value::Array(Vec::new()),
            timezone: timezone.to_string(),
            updated_at: timestamp,
        }
    }

    /// Derived completion percentage for this record against its media
    ///
    /// Long-play media measures the cumulative chain (pages for paginated
    /// media, seconds otherwise); everything else measures the session
    /// position. Unknown run length reports per the configured policy.
    pub fn percent_played(&self, media: &TrackableMedia, assume_complete_when_unknown: bool) -> u8 {
        if media.is_long_play() {
            if let (Some(pages), Some(total)) = (self.long_play_pages, media.total_pages) {
                if total > 0 {
                    return ((pages * 100) / total).clamp(0, 100) as u8;
                }
            }
            return percent_from_position(
                self.long_play_seconds.or(self.playback_position_seconds),
                media.run_time_seconds,
                assume_complete_when_unknown,
            );
        }
        percent_from_position(
            self.playback_position_seconds,
            media.run_time_seconds,
            assume_complete_when_unknown,
        )
    }

    /// Append a provenance note to the structured log
    pub fn append_log(&mut self, entry: serde_json::Value) {
        match &mut self.log {
            serde_json::Value::Array(entries) => entries.push(entry),
            other => {
                // Older rows may hold a bare object; wrap it
                let previous = other.take();
                self.log = serde_json::Value::Array(vec![previous, entry]);
            }
        }
    }
}

/// Percent played from a raw position over a run length
pub fn percent_from_position(
    position_seconds: Option<i64>,
    run_time_seconds: Option<i64>,
    assume_complete_when_unknown: bool,
) -> u8 {
    match run_time_seconds {
        None | Some(0) => {
            if assume_complete_when_unknown {
                100
            } else {
                0
            }
        }
        Some(run_time) => match position_seconds {
            None => 0,
            Some(position) => ((position * 100) / run_time).clamp(0, 100) as u8,
        },
    }
}

fn epoch(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

fn from_epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn row_to_record(row: &SqliteRow) -> Result<ScrobbleRecord> {
    let guid: String = row.try_get("guid")?;
    let media_kind: String = row.try_get("media_kind")?;
    let media_id: String = row.try_get("media_id")?;
    let user_id: String = row.try_get("user_id")?;
    let log_text: Option<String> = row.try_get("log")?;
    let long_play_complete: Option<i64> = row.try_get("long_play_complete")?;
    let in_progress: i64 = row.try_get("in_progress")?;
    let is_paused: i64 = row.try_get("is_paused")?;
    let played_to_completion: i64 = row.try_get("played_to_completion")?;
    let stop_timestamp: Option<i64> = row.try_get("stop_timestamp")?;

    let kind: MediaKind = media_kind.parse()?;
    let parse_uuid = |s: &str, what: &str| {
        Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Bad {} in db: {}", what, e)))
    };

    Ok(ScrobbleRecord {
        id: row.try_get("id")?,
        guid: parse_uuid(&guid, "scrobble guid")?,
        media: MediaRef::new(kind, parse_uuid(&media_id, "media id")?),
        user_id: parse_uuid(&user_id, "user id")?,
        timestamp: from_epoch(row.try_get("timestamp")?),
        stop_timestamp: stop_timestamp.map(from_epoch),
        playback_position_seconds: row.try_get("playback_position_seconds")?,
        in_progress: in_progress != 0,
        is_paused: is_paused != 0,
        played_to_completion: played_to_completion != 0,
        long_play_seconds: row.try_get("long_play_seconds")?,
        long_play_pages: row.try_get("long_play_pages")?,
        long_play_complete: long_play_complete.map(|v| v != 0),
        book_pages_read: row.try_get("book_pages_read")?,
        source: row.try_get("source")?,
        log: log_text
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new())),
        timezone: row.try_get("timezone")?,
        updated_at: from_epoch(row.try_get("updated_at")?),
    })
}

/// Persist a new record; returns it with the surrogate id filled in
pub async fn insert(db: &Pool<Sqlite>, record: &ScrobbleRecord) -> Result<ScrobbleRecord> {
    let result = sqlx::query(
        r#"
        INSERT INTO scrobbles (
            guid, media_kind, media_id, user_id, timestamp, stop_timestamp,
            playback_position_seconds, in_progress, is_paused, played_to_completion,
            long_play_seconds, long_play_pages, long_play_complete, book_pages_read,
            source, log, timezone, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.guid.to_string())
    .bind(record.media.kind.as_str())
    .bind(record.media.id.to_string())
    .bind(record.user_id.to_string())
    .bind(epoch(record.timestamp))
    .bind(record.stop_timestamp.map(epoch))
    .bind(record.playback_position_seconds)
    .bind(record.in_progress as i64)
    .bind(record.is_paused as i64)
    .bind(record.played_to_completion as i64)
    .bind(record.long_play_seconds)
    .bind(record.long_play_pages)
    .bind(record.long_play_complete.map(|v| v as i64))
    .bind(record.book_pages_read)
    .bind(&record.source)
    .bind(record.log.to_string())
    .bind(&record.timezone)
    .bind(epoch(record.updated_at))
    .execute(db)
    .await?;

    let mut persisted = record.clone();
    persisted.id = result.last_insert_rowid();
    Ok(persisted)
}

/// Write all mutable fields back in a single statement
///
/// `timestamp` is deliberately absent from the SET list.
pub async fn update(db: &Pool<Sqlite>, record: &ScrobbleRecord) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE scrobbles SET
            stop_timestamp = ?,
            playback_position_seconds = ?,
            in_progress = ?,
            is_paused = ?,
            played_to_completion = ?,
            long_play_seconds = ?,
            long_play_pages = ?,
            long_play_complete = ?,
            book_pages_read = ?,
            source = ?,
            log = ?,
            updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(record.stop_timestamp.map(epoch))
    .bind(record.playback_position_seconds)
    .bind(record.in_progress as i64)
    .bind(record.is_paused as i64)
    .bind(record.played_to_completion as i64)
    .bind(record.long_play_seconds)
    .bind(record.long_play_pages)
    .bind(record.long_play_complete.map(|v| v as i64))
    .bind(record.book_pages_read)
    .bind(&record.source)
    .bind(record.log.to_string())
    .bind(epoch(record.updated_at))
    .bind(record.guid.to_string())
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("scrobble {}", record.guid)));
    }
    Ok(())
}

/// Most recent record for (media, user), regardless of state
pub async fn latest_for(
    db: &Pool<Sqlite>,
    media: MediaRef,
    user_id: Uuid,
) -> Result<Option<ScrobbleRecord>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM scrobbles
        WHERE media_kind = ? AND media_id = ? AND user_id = ?
        ORDER BY timestamp DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(media.kind.as_str())
    .bind(media.id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(db)
    .await?;

    row.as_ref().map(row_to_record).transpose()
}

pub async fn get(db: &Pool<Sqlite>, guid: Uuid) -> Result<ScrobbleRecord> {
    let row = sqlx::query("SELECT * FROM scrobbles WHERE guid = ?")
        .bind(guid.to_string())
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("scrobble {}", guid)))?;
    row_to_record(&row)
}

pub async fn delete(db: &Pool<Sqlite>, guid: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM scrobbles WHERE guid = ?")
        .bind(guid.to_string())
        .execute(db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("scrobble {}", guid)));
    }
    Ok(())
}

/// Delete exactly the given records; used by import undo
pub async fn delete_many(db: &Pool<Sqlite>, guids: &[Uuid]) -> Result<u64> {
    let mut deleted = 0;
    let mut tx = db.begin().await?;
    for guid in guids {
        let result = sqlx::query("DELETE FROM scrobbles WHERE guid = ?")
            .bind(guid.to_string())
            .execute(&mut *tx)
            .await?;
        deleted += result.rows_affected();
    }
    tx.commit().await?;
    Ok(deleted)
}

/// The user's single active location record, if any
pub async fn latest_in_progress_location(
    db: &Pool<Sqlite>,
    user_id: Uuid,
) -> Result<Option<ScrobbleRecord>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM scrobbles
        WHERE user_id = ? AND media_kind = ? AND in_progress = 1
        ORDER BY timestamp DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .bind(MediaKind::Location.as_str())
    .fetch_optional(db)
    .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Last N location records for the movement test, newest first
pub async fn recent_location_history(
    db: &Pool<Sqlite>,
    user_id: Uuid,
    limit: usize,
) -> Result<Vec<ScrobbleRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM scrobbles
        WHERE user_id = ? AND media_kind = ?
        ORDER BY timestamp DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(user_id.to_string())
    .bind(MediaKind::Location.as_str())
    .bind(limit as i64)
    .fetch_all(db)
    .await?;

    rows.iter().map(row_to_record).collect()
}

/// The finalized session immediately preceding `before` in the long-play chain
pub async fn previous_finalized_session(
    db: &Pool<Sqlite>,
    media: MediaRef,
    user_id: Uuid,
    before: DateTime<Utc>,
    exclude: Uuid,
) -> Result<Option<ScrobbleRecord>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM scrobbles
        WHERE media_kind = ? AND media_id = ? AND user_id = ?
          AND in_progress = 0 AND timestamp < ? AND guid != ?
        ORDER BY timestamp DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(media.kind.as_str())
    .bind(media.id.to_string())
    .bind(user_id.to_string())
    .bind(epoch(before))
    .bind(exclude.to_string())
    .fetch_optional(db)
    .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Import idempotency check: does a record already exist at this instant?
pub async fn exists_at(
    db: &Pool<Sqlite>,
    media: MediaRef,
    user_id: Uuid,
    timestamp: DateTime<Utc>,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM scrobbles
            WHERE media_kind = ? AND media_id = ? AND user_id = ? AND timestamp = ?
        )
        "#,
    )
    .bind(media.kind.as_str())
    .bind(media.id.to_string())
    .bind(user_id.to_string())
    .bind(epoch(timestamp))
    .fetch_one(db)
    .await?;
    Ok(exists)
}

/// In-progress records that were never finished and have gone stale
pub async fn zombie_candidates(
    db: &Pool<Sqlite>,
    cutoff: DateTime<Utc>,
) -> Result<Vec<ScrobbleRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM scrobbles
        WHERE in_progress = 1 AND is_paused = 0 AND played_to_completion = 0
          AND updated_at < ?
        ORDER BY updated_at
        "#,
    )
    .bind(epoch(cutoff))
    .fetch_all(db)
    .await?;

    rows.iter().map(row_to_record).collect()
}

/// Recent records, newest first, optionally restricted to one user
pub async fn recent(
    db: &Pool<Sqlite>,
    user_id: Option<Uuid>,
    limit: usize,
) -> Result<Vec<ScrobbleRecord>> {
    let rows = match user_id {
        Some(user_id) => {
            sqlx::query(
                "SELECT * FROM scrobbles WHERE user_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
            )
            .bind(user_id.to_string())
            .bind(limit as i64)
            .fetch_all(db)
            .await?
        }
        None => {
            sqlx::query("SELECT * FROM scrobbles ORDER BY timestamp DESC, id DESC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(db)
                .await?
        }
    };

    rows.iter().map(row_to_record).collect()
}

/// Count of in-progress records for one (media, user) key; invariant checks
pub async fn in_progress_count(db: &Pool<Sqlite>, media: MediaRef, user_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM scrobbles
        WHERE media_kind = ? AND media_id = ? AND user_id = ? AND in_progress = 1
        "#,
    )
    .bind(media.kind.as_str())
    .bind(media.id.to_string())
    .bind(user_id.to_string())
    .fetch_one(db)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;
    use crate::db::users::anonymous_user_id;
    use crate::media::{MediaIdentity, MediaKind};

    async fn media_fixture(db: &Pool<Sqlite>, run_time: Option<i64>) -> TrackableMedia {
        crate::db::media::find_or_create_media(
            db,
            MediaKind::Track,
            &MediaIdentity {
                title: Some("row test".into()),
                subtitle: Some("band".into()),
                run_time_seconds: run_time,
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn insert_and_round_trip() {
        let db = init_memory_database().await.unwrap();
        let media = media_fixture(&db, Some(200)).await;
        let user = anonymous_user_id();

        let mut record =
            ScrobbleRecord::start(media.media_ref, user, Utc::now(), "test", "UTC");
        record.playback_position_seconds = Some(42);
        let persisted = insert(&db, &record).await.unwrap();
        assert!(persisted.id > 0);

        let loaded = get(&db, record.guid).await.unwrap();
        assert_eq!(loaded.playback_position_seconds, Some(42));
        assert!(loaded.in_progress);
        assert_eq!(loaded.media, media.media_ref);
    }

    #[tokio::test]
    async fn update_never_touches_timestamp() {
        let db = init_memory_database().await.unwrap();
        let media = media_fixture(&db, Some(200)).await;
        let user = anonymous_user_id();
        let started = from_epoch(1_700_000_000);

        let record = ScrobbleRecord::start(media.media_ref, user, started, "test", "UTC");
        insert(&db, &record).await.unwrap();

        let mut changed = record.clone();
        changed.timestamp = from_epoch(1_800_000_000); // must be ignored
        changed.playback_position_seconds = Some(10);
        update(&db, &changed).await.unwrap();

        let loaded = get(&db, record.guid).await.unwrap();
        assert_eq!(loaded.timestamp, started);
        assert_eq!(loaded.playback_position_seconds, Some(10));
    }

    #[tokio::test]
    async fn latest_for_orders_by_timestamp() {
        let db = init_memory_database().await.unwrap();
        let media = media_fixture(&db, Some(200)).await;
        let user = anonymous_user_id();

        let older = ScrobbleRecord::start(media.media_ref, user, from_epoch(1000), "a", "UTC");
        let newer = ScrobbleRecord::start(media.media_ref, user, from_epoch(2000), "b", "UTC");
        insert(&db, &older).await.unwrap();
        insert(&db, &newer).await.unwrap();

        let latest = latest_for(&db, media.media_ref, user).await.unwrap().unwrap();
        assert_eq!(latest.guid, newer.guid);
    }

    #[test]
    fn percent_unknown_runtime_follows_policy() {
        assert_eq!(percent_from_position(Some(50), None, true), 100);
        assert_eq!(percent_from_position(Some(50), None, false), 0);
        assert_eq!(percent_from_position(Some(96), Some(100), true), 96);
        assert_eq!(percent_from_position(Some(150), Some(100), true), 100);
        assert_eq!(percent_from_position(None, Some(100), true), 0);
    }

    #[test]
    fn long_play_pages_beat_seconds() {
        let media = TrackableMedia {
            media_ref: MediaRef::new(MediaKind::Book, Uuid::new_v4()),
            title: "b".into(),
            subtitle: None,
            external_id: None,
            run_time_seconds: Some(10_000),
            total_pages: Some(200),
            completion_percent: None,
            latitude: None,
            longitude: None,
        };
        let mut record =
            ScrobbleRecord::start(media.media_ref, Uuid::new_v4(), Utc::now(), "t", "UTC");
        record.long_play_pages = Some(100);
        record.long_play_seconds = Some(9_999);
        assert_eq!(record.percent_played(&media, true), 50);
    }
}
