//! Long-play accumulator
//!
//! Books and games are consumed across many discrete sessions; a single
//! session's position says nothing about total progress. On finalize, each
//! session record carries the cumulative totals forward from the previous
//! finalized session in the chain. A completed chain link resets accumulation,
//! so a re-read of a finished book starts a fresh count.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite};

use crate::error::Result;
use scrobd_common::db::records::{self, ScrobbleRecord};
use scrobd_common::media::TrackableMedia;
use scrobd_common::policy::LongPlayPolicy;

/// Finish procedure: fold this session into the chain's cumulative totals
///
/// Walks exactly one link back to the most recent finalized session. Sessions
/// must be finalized in chronological order for the carry to be correct;
/// importers sort their input for this reason.
pub async fn finalize(
    db: &Pool<Sqlite>,
    record: &mut ScrobbleRecord,
    media: &TrackableMedia,
    completion_percent: u8,
) -> Result<()> {
    let session_seconds = record.playback_position_seconds.unwrap_or(0);
    let session_pages = record.book_pages_read.unwrap_or(0);

    let previous = records::previous_finalized_session(
        db,
        record.media,
        record.user_id,
        record.timestamp,
        record.guid,
    )
    .await?;

    let (carry_seconds, carry_pages) = match &previous {
        Some(prev) if prev.long_play_complete == Some(false) => (
            prev.long_play_seconds.unwrap_or(0),
            prev.long_play_pages.unwrap_or(0),
        ),
        // No chain, or the chain finished: accumulation restarts from zero
        _ => (0, 0),
    };

    let total_seconds = carry_seconds + session_seconds;
    let total_pages = carry_pages + session_pages;
    record.long_play_seconds = Some(total_seconds);
    record.long_play_pages = Some(total_pages);
    record.long_play_complete = Some(chain_complete(
        media,
        completion_percent,
        total_seconds,
        total_pages,
    ));
    Ok(())
}

/// Has cumulative progress crossed the media's completion threshold?
///
/// Pages are the unit for paginated media, seconds otherwise. The comparison
/// is a strict crossing in raw units rather than a clamped percentage, so
/// landing exactly on the threshold does not complete the chain.
fn chain_complete(
    media: &TrackableMedia,
    completion_percent: u8,
    total_seconds: i64,
    total_pages: i64,
) -> bool {
    let pct = completion_percent as i64;
    if let Some(pages) = media.total_pages {
        if pages > 0 {
            return total_pages * 100 > pages * pct;
        }
    }
    if let Some(run_time) = media.run_time_seconds {
        if run_time > 0 {
            return total_seconds * 100 > run_time * pct;
        }
    }
    // Nothing to measure against; the chain can never complete
    false
}

/// One page visit in a granular page-turn stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageTurn {
    pub page: i64,
    pub start: DateTime<Utc>,
    pub duration_seconds: i64,
}

impl PageTurn {
    fn end(&self) -> DateTime<Utc> {
        self.start + Duration::seconds(self.duration_seconds)
    }
}

/// Total time spent on one page within a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageStay {
    pub duration_seconds: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Sparse page-number map built while ingesting page-turn events
///
/// Pages-read is the span between the lowest and highest page seen, not a
/// visit count: re-reading a page within a session must not double count.
#[derive(Debug, Default)]
pub struct PageMap {
    stays: BTreeMap<i64, PageStay>,
}

impl PageMap {
    pub fn record(&mut self, turn: PageTurn) {
        let end = turn.end();
        self.stays
            .entry(turn.page)
            .and_modify(|stay| {
                stay.duration_seconds += turn.duration_seconds;
                if turn.start < stay.start {
                    stay.start = turn.start;
                }
                if end > stay.end {
                    stay.end = end;
                }
            })
            .or_insert(PageStay {
                duration_seconds: turn.duration_seconds,
                start: turn.start,
                end,
            });
    }

    pub fn is_empty(&self) -> bool {
        self.stays.is_empty()
    }

    pub fn pages_read(&self) -> i64 {
        match (self.stays.keys().next(), self.stays.keys().next_back()) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }

    pub fn total_seconds(&self) -> i64 {
        self.stays.values().map(|s| s.duration_seconds).sum()
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        self.stays.values().map(|s| s.start).min()
    }

    pub fn session_end(&self) -> Option<DateTime<Utc>> {
        self.stays.values().map(|s| s.end).max()
    }
}

/// Split a chronological page-turn stream into reading sessions
///
/// A gap longer than the configured session gap starts a new session, unless
/// the reader also jumped far through the book, which reads as skimming within
/// the same sitting rather than putting the book down.
pub fn split_sessions(turns: &[PageTurn], policy: &LongPlayPolicy) -> Vec<Vec<PageTurn>> {
    let mut sessions: Vec<Vec<PageTurn>> = Vec::new();
    let mut current: Vec<PageTurn> = Vec::new();

    for turn in turns {
        if let Some(prev) = current.last() {
            let gap = (turn.start - prev.end()).num_seconds();
            let jump = (turn.page - prev.page).abs();
            if gap > policy.session_gap_seconds && jump <= policy.session_page_jump {
                sessions.push(std::mem::take(&mut current));
            }
        }
        current.push(*turn);
    }
    if !current.is_empty() {
        sessions.push(current);
    }
    sessions
}
