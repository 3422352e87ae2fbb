//! KOReader statistics import
//!
//! KOReader keeps a `statistics.sqlite3` with one row per page visit
//! (`page_stat`: book, page, start_time, duration) plus book metadata. The
//! page stream is split into reading sessions, each session becomes one
//! finalized book scrobble, and the accumulator chains them into cumulative
//! progress.

use std::collections::HashMap;
use std::path::Path;

use chrono::{TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;
use uuid::Uuid;

use crate::engine::longplay::{split_sessions, PageMap, PageTurn};
use crate::engine::Reconciler;
use crate::error::{Error, Result};
use crate::imports::{run_import, ImportEntry, ImportOutcome};
use crate::normalize::{CanonicalEvent, PlaybackStatus};
use scrobd_common::media::{MediaIdentity, MediaKind};
use scrobd_common::policy::LongPlayPolicy;

pub const SOURCE_TAG: &str = "koreader";

#[derive(Debug, Clone)]
struct BookMeta {
    title: String,
    authors: Option<String>,
    pages: Option<i64>,
    md5: Option<String>,
}

/// Open the statistics database read-only; the import never writes to it
async fn open_statistics(path: &Path) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| Error::ImportSource(format!("{}: {}", path.display(), e)))
}

/// Read every page visit, grouped per book in chronological order
async fn read_page_stats(stats: &Pool<Sqlite>) -> Result<HashMap<i64, (BookMeta, Vec<PageTurn>)>> {
    let rows = sqlx::query(
        r#"
        SELECT b.id AS book_id, b.title, b.authors, b.pages, b.md5,
               p.page, p.start_time, p.duration
        FROM page_stat p
        JOIN book b ON b.id = p.id_book
        ORDER BY b.id, p.start_time
        "#,
    )
    .fetch_all(stats)
    .await
    .map_err(|e| Error::ImportSource(format!("statistics query failed: {}", e)))?;

    let mut books: HashMap<i64, (BookMeta, Vec<PageTurn>)> = HashMap::new();
    for row in rows {
        let book_id: i64 = row.try_get("book_id").map_err(scrobd_common::Error::from)?;
        let entry = books.entry(book_id).or_insert_with(|| {
            (
                BookMeta {
                    title: row.try_get("title").unwrap_or_default(),
                    authors: row.try_get("authors").ok().flatten(),
                    pages: row.try_get("pages").ok().flatten(),
                    md5: row.try_get("md5").ok().flatten(),
                },
                Vec::new(),
            )
        });

        let start_epoch: i64 = row.try_get("start_time").map_err(scrobd_common::Error::from)?;
        let Some(start) = Utc.timestamp_opt(start_epoch, 0).single() else {
            continue;
        };
        entry.1.push(PageTurn {
            page: row.try_get("page").map_err(scrobd_common::Error::from)?,
            start,
            duration_seconds: row.try_get("duration").map_err(scrobd_common::Error::from)?,
        });
    }
    Ok(books)
}

/// One import entry per reading session
fn sessions_to_entries(
    meta: &BookMeta,
    turns: &[PageTurn],
    policy: &LongPlayPolicy,
) -> Vec<ImportEntry> {
    let mut entries = Vec::new();
    for session in split_sessions(turns, policy) {
        let mut map = PageMap::default();
        for turn in &session {
            map.record(*turn);
        }
        let Some(start) = map.session_start() else {
            continue;
        };

        let mut event = CanonicalEvent::new(start, PlaybackStatus::Stopped, SOURCE_TAG);
        event.playback_position_seconds = Some(map.total_seconds());
        event.pages_read = Some(map.pages_read());

        entries.push(ImportEntry {
            kind: MediaKind::Book,
            identity: MediaIdentity {
                external_id: meta.md5.clone(),
                title: Some(meta.title.clone()),
                subtitle: meta.authors.clone(),
                total_pages: meta.pages,
                ..Default::default()
            },
            event,
        });
    }
    entries
}

/// Import a KOReader statistics database for a user
pub async fn import_file(
    engine: &Reconciler,
    path: &Path,
    user_id: Uuid,
    force: bool,
) -> Result<ImportOutcome> {
    if !path.exists() {
        return Err(Error::ImportSource(format!(
            "{}: no such file",
            path.display()
        )));
    }
    let stats = open_statistics(path).await?;
    let books = read_page_stats(&stats).await?;
    stats.close().await;

    let policy = engine.policy().long_play;
    let mut entries = Vec::new();
    for (meta, turns) in books.values() {
        debug!("KOReader book '{}': {} page visits", meta.title, turns.len());
        entries.extend(sessions_to_entries(meta, turns, &policy));
    }
    if entries.is_empty() {
        return Err(Error::ImportSource(format!(
            "{}: no reading sessions found",
            path.display()
        )));
    }

    run_import(engine, SOURCE_TAG, user_id, entries, force).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn turn(page: i64, start: i64, duration: i64) -> PageTurn {
        PageTurn {
            page,
            start: DateTime::from_timestamp(1_700_000_000 + start, 0).unwrap(),
            duration_seconds: duration,
        }
    }

    #[test]
    fn sessions_become_entries_with_page_spans() {
        let meta = BookMeta {
            title: "Solaris".into(),
            authors: Some("Stanisław Lem".into()),
            pages: Some(204),
            md5: Some("d41d8cd9".into()),
        };
        let policy = LongPlayPolicy::default();
        // Two sittings separated by a two-hour gap on adjacent pages
        let turns = [
            turn(10, 0, 60),
            turn(11, 60, 60),
            turn(12, 120, 60),
            turn(13, 120 + 60 + 7200, 60),
            turn(14, 120 + 120 + 7200, 60),
        ];

        let entries = sessions_to_entries(&meta, &turns, &policy);
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].event.pages_read, Some(2));
        assert_eq!(entries[0].event.playback_position_seconds, Some(180));
        assert_eq!(entries[1].event.pages_read, Some(1));
        assert_eq!(entries[0].identity.external_id.as_deref(), Some("d41d8cd9"));
        assert_eq!(entries[0].identity.total_pages, Some(204));
    }
}
