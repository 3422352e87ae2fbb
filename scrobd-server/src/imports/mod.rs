//! Import batch processors
//!
//! Each processor turns a bulk external source into an ordered sequence of
//! synthetic events and feeds them through the reconciliation engine. Every
//! run is bracketed by a job row holding an undo log of the record GUIDs the
//! run created, so a bad import can be rolled back exactly, never more.

pub mod audioscrobbler;
pub mod koreader;
pub mod lastfm;

use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::Reconciler;
use crate::error::Result;
use crate::normalize::CanonicalEvent;
use scrobd_common::db::imports as jobs_db;
use scrobd_common::db::media as catalog;
use scrobd_common::db::records;
use scrobd_common::db::users::lookup_user_profile;
use scrobd_common::events::ScrobbleEvent;
use scrobd_common::media::{MediaIdentity, MediaKind};

/// One synthetic record a processor wants created
#[derive(Debug, Clone)]
pub struct ImportEntry {
    pub kind: MediaKind,
    pub identity: MediaIdentity,
    pub event: CanonicalEvent,
}

/// Result of one import run
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub job_guid: Uuid,
    pub created: usize,
    pub skipped: usize,
    /// Entries that could not be resolved or reconciled
    pub failed: usize,
}

/// Result of one undo pass
#[derive(Debug, Clone, Copy)]
pub struct UndoOutcome {
    pub job_guid: Uuid,
    /// Records the undo log names
    pub candidates: usize,
    /// Records actually deleted (0 on a dry run)
    pub deleted: u64,
}

/// Feed a batch of entries through the engine under one job bracket
///
/// Idempotent by default: an entry whose (media, user, timestamp) already has
/// a record is skipped. `force` disables the skip and replays every entry.
/// A bad entry is logged and counted, never fatal, so the undo log always
/// reaches the job row.
pub async fn run_import(
    engine: &Reconciler,
    source: &str,
    user_id: Uuid,
    mut entries: Vec<ImportEntry>,
    force: bool,
) -> Result<ImportOutcome> {
    let db = engine.db();
    let profile = lookup_user_profile(db, user_id).await?;

    if !force {
        if let Some(prev) = jobs_db::latest_job(db, source, user_id).await? {
            if prev.is_finished() {
                info!(
                    "Prior '{}' import {} finished with {} records; already-imported entries will be skipped",
                    source,
                    prev.guid,
                    prev.created_guids.len()
                );
            } else {
                warn!(
                    "Prior '{}' import {} never finished; resuming where it left off",
                    source, prev.guid
                );
            }
        }
    }

    let job = jobs_db::begin_job(db, source, user_id, engine.now()).await?;
    engine
        .events()
        .emit(ScrobbleEvent::ImportStarted {
            job_id: job.guid,
            source: source.to_string(),
            timestamp: job.started_at,
        })
        .ok();

    // Chronological order keeps the long-play carry correct
    entries.sort_by_key(|e| e.event.timestamp);

    let mut created_guids = Vec::new();
    let mut skipped = 0usize;
    let mut failed = 0usize;
    for entry in entries {
        match import_entry(engine, &profile, &entry, force).await {
            Ok(EntryOutcome::Created(guid)) => created_guids.push(guid),
            Ok(EntryOutcome::Skipped) => skipped += 1,
            Ok(EntryOutcome::Replayed) => {}
            Err(e) => {
                warn!(
                    "Import '{}' entry at {} failed: {}",
                    source, entry.event.timestamp, e
                );
                failed += 1;
            }
        }
    }

    let notes = (failed > 0).then(|| format!("failed entries: {}", failed));
    jobs_db::finish_job(
        db,
        job.guid,
        engine.now(),
        &created_guids,
        skipped as i64,
        notes.as_deref(),
    )
    .await?;

    info!(
        "Import '{}' for {}: {} created, {} skipped, {} failed",
        source,
        profile.username,
        created_guids.len(),
        skipped,
        failed
    );
    engine
        .events()
        .emit(ScrobbleEvent::ImportFinished {
            job_id: job.guid,
            source: source.to_string(),
            created: created_guids.len(),
            skipped,
            timestamp: engine.now(),
        })
        .ok();

    Ok(ImportOutcome {
        job_guid: job.guid,
        created: created_guids.len(),
        skipped,
        failed,
    })
}

enum EntryOutcome {
    Created(Uuid),
    Skipped,
    /// Forced replay over a record that already existed; nothing new to undo
    Replayed,
}

/// Resolve and reconcile one entry
async fn import_entry(
    engine: &Reconciler,
    profile: &scrobd_common::db::users::UserProfile,
    entry: &ImportEntry,
    force: bool,
) -> Result<EntryOutcome> {
    let db = engine.db();
    let media = catalog::find_or_create_media(db, entry.kind, &entry.identity).await?;
    let existed =
        records::exists_at(db, media.media_ref, profile.user_id, entry.event.timestamp).await?;
    if existed && !force {
        return Ok(EntryOutcome::Skipped);
    }
    let record = engine.reconcile(&media, profile, &entry.event).await?;
    Ok(if existed {
        EntryOutcome::Replayed
    } else {
        EntryOutcome::Created(record.guid)
    })
}

/// Delete exactly the records a prior job created
///
/// A corrupt undo log aborts before anything is touched. A dry run reports
/// the candidate count without deleting.
pub async fn undo_import(engine: &Reconciler, job_guid: Uuid, dry_run: bool) -> Result<UndoOutcome> {
    let job = jobs_db::get_job(engine.db(), job_guid).await?;
    let candidates = job.created_guids.len();

    if dry_run {
        return Ok(UndoOutcome {
            job_guid,
            candidates,
            deleted: 0,
        });
    }

    let deleted = records::delete_many(engine.db(), &job.created_guids).await?;
    info!(
        "Undid import job {}: {} of {} records deleted",
        job_guid, deleted, candidates
    );
    Ok(UndoOutcome {
        job_guid,
        candidates,
        deleted,
    })
}
