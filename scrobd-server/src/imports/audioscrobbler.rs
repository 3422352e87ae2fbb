//! Audioscrobbler `.scrobbler.log` import
//!
//! Portable players (Rockbox and friends) write a TSV log: header lines start
//! with `#`, then one listen per line with the columns
//! `artist album track tracknum duration rating timestamp mbid`. Rating `L`
//! means listened, `S` means skipped; skips are not scrobbles.

use chrono::{TimeZone, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::engine::Reconciler;
use crate::error::{Error, Result};
use crate::imports::{run_import, ImportEntry, ImportOutcome};
use crate::normalize::{CanonicalEvent, PlaybackStatus};
use scrobd_common::media::{MediaIdentity, MediaKind};

pub const SOURCE_TAG: &str = "audioscrobbler";

/// Parse log content into import entries; malformed lines are skipped loudly
pub fn parse(content: &str) -> Vec<ImportEntry> {
    let mut entries = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            warn!(
                "Skipping malformed scrobbler.log line {} ({} fields)",
                line_no + 1,
                fields.len()
            );
            continue;
        }

        let rating = fields[5].trim();
        if rating.eq_ignore_ascii_case("S") {
            continue;
        }

        let Ok(epoch) = fields[6].trim().parse::<i64>() else {
            warn!("Skipping scrobbler.log line {}: bad timestamp", line_no + 1);
            continue;
        };
        let Some(timestamp) = Utc.timestamp_opt(epoch, 0).single() else {
            warn!(
                "Skipping scrobbler.log line {}: timestamp out of range",
                line_no + 1
            );
            continue;
        };

        let duration = fields[4].trim().parse::<i64>().ok().filter(|d| *d > 0);
        let mbid = fields
            .get(7)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let mut event = CanonicalEvent::new(timestamp, PlaybackStatus::Stopped, SOURCE_TAG);
        event.playback_position_seconds = duration;

        entries.push(ImportEntry {
            kind: MediaKind::Track,
            identity: MediaIdentity {
                external_id: mbid,
                title: Some(fields[2].to_string()),
                subtitle: Some(fields[0].to_string()),
                run_time_seconds: duration,
                ..Default::default()
            },
            event,
        });
    }

    entries
}

/// Import one log file for a user
pub async fn import_file(
    engine: &Reconciler,
    path: &std::path::Path,
    user_id: Uuid,
    force: bool,
) -> Result<ImportOutcome> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::ImportSource(format!("{}: {}", path.display(), e)))?;
    let entries = parse(&content);
    if entries.is_empty() {
        return Err(Error::ImportSource(format!(
            "{}: no listens found",
            path.display()
        )));
    }
    run_import(engine, SOURCE_TAG, user_id, entries, force).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "#AUDIOSCROBBLER/1.1\n\
        #TZ/UNKNOWN\n\
        #CLIENT/Rockbox v3.15\n\
        Sublime\t40oz. to Freedom\tSame in the End\t11\t156\tL\t1714557600\t\n\
        Sublime\t40oz. to Freedom\tBadfish\t8\t183\tS\t1714557800\t\n\
        Low\tHEY WHAT\tDays Like These\t3\t221\tL\t1714558000\tabc-mbid\n";

    #[test]
    fn listens_parse_and_skips_are_dropped() {
        let entries = parse(LOG);
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.kind, MediaKind::Track);
        assert_eq!(first.identity.title.as_deref(), Some("Same in the End"));
        assert_eq!(first.identity.subtitle.as_deref(), Some("Sublime"));
        assert_eq!(first.identity.run_time_seconds, Some(156));
        assert_eq!(first.event.timestamp.timestamp(), 1_714_557_600);
        assert_eq!(first.event.status, PlaybackStatus::Stopped);

        assert_eq!(entries[1].identity.external_id.as_deref(), Some("abc-mbid"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let entries = parse("not a log line\nalso\tnot\tenough\tfields\n");
        assert!(entries.is_empty());
    }
}
