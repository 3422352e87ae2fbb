//! Scrobble reconciliation engine
//!
//! `reconcile` takes a canonical event and either updates the latest record for
//! the (media, user) pair or creates a new one, keeping at most one in-progress
//! record per pair at all times. Location media takes its own path (movement
//! detection instead of playback state); long-play media hands finalization to
//! the accumulator.
//!
//! Every wall-clock comparison goes through the injected [`Clock`], and every
//! threshold comes from the [`ReconciliationPolicy`] handed in at construction.

pub mod location;
pub mod longplay;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::normalize::{CanonicalEvent, PlaybackStatus, SourceEvent};
use scrobd_common::clock::Clock;
use scrobd_common::db::media as catalog;
use scrobd_common::db::records::{self, ScrobbleRecord};
use scrobd_common::db::users::{lookup_user_profile, UserProfile};
use scrobd_common::events::{EventBus, ScrobbleEvent};
use scrobd_common::media::{MediaKind, TrackableMedia};
use scrobd_common::policy::ReconciliationPolicy;

/// One lock per (user, kind, media); location collapses media to nil so all
/// of a user's fixes serialize against each other
type LockKey = (Uuid, MediaKind, Uuid);

pub struct Reconciler {
    db: Pool<Sqlite>,
    policy: ReconciliationPolicy,
    clock: Arc<dyn Clock>,
    events: EventBus,
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(
        db: Pool<Sqlite>,
        policy: ReconciliationPolicy,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            policy,
            clock,
            events,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn db(&self) -> &Pool<Sqlite> {
        &self.db
    }

    pub fn policy(&self) -> &ReconciliationPolicy {
        &self.policy
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn key_lock(&self, key: LockKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            // A guard holds its Arc, so a strong count of 1 means the slot
            // is idle and safe to drop
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            locks.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Resolve the media and user behind a normalized source event, then
    /// reconcile it
    pub async fn ingest(&self, user_id: Uuid, source_event: &SourceEvent) -> Result<ScrobbleRecord> {
        let media =
            catalog::find_or_create_media(&self.db, source_event.kind, &source_event.identity)
                .await?;
        let profile = lookup_user_profile(&self.db, user_id).await?;
        self.reconcile(&media, &profile, &source_event.event).await
    }

    /// Apply one canonical event against the latest record for (media, user)
    pub async fn reconcile(
        &self,
        media: &TrackableMedia,
        profile: &UserProfile,
        event: &CanonicalEvent,
    ) -> Result<ScrobbleRecord> {
        let lock_media = if media.kind() == MediaKind::Location {
            Uuid::nil()
        } else {
            media.media_ref.id
        };
        let _guard = self
            .key_lock((profile.user_id, media.kind(), lock_media))
            .await;

        if media.kind() == MediaKind::Location {
            return location::reconcile(self, media, profile, event).await;
        }

        let now = self.clock.now();
        if let Some(candidate) = records::latest_for(&self.db, media.media_ref, profile.user_id).await? {
            if self.takes_update_path(&candidate, media, profile, event, now) {
                return self.apply_update(candidate, media, profile, event).await;
            }
            if candidate.in_progress {
                // The old session can no longer absorb events but still has to
                // close before a new one may open
                info!(
                    "Superseding stale session {} for {} before starting a new one",
                    candidate.guid, media.media_ref
                );
                self.force_finish_record(candidate, media, profile).await?;
            }
        }
        self.create(media, profile, event).await
    }

    /// Step 1 of the decision: does this event land on the candidate, or does
    /// it open a new session?
    fn takes_update_path(
        &self,
        candidate: &ScrobbleRecord,
        media: &TrackableMedia,
        profile: &UserProfile,
        event: &CanonicalEvent,
        now: DateTime<Utc>,
    ) -> bool {
        if candidate.in_progress {
            // Completion must always be captured, even on a record the
            // freshness rules below would otherwise reject
            if event.status == PlaybackStatus::Stopped {
                return true;
            }
            if !media.is_long_play()
                && self.incoming_percent(candidate, media, event)
                    >= self.completion_threshold(media, profile)
            {
                return true;
            }
        } else if event.status == PlaybackStatus::Stopped {
            // A duplicate stop inside the closed session's grace window is a
            // no-op on the finalized record, not a new session
            if let Some(stop) = candidate.stop_timestamp {
                let window = stop + Duration::seconds(self.policy.grace_seconds(media.kind()));
                if event.timestamp <= window {
                    return true;
                }
            }
        }

        self.can_be_updated(candidate, media, now)
    }

    /// Freshness rules: a finalized record is never reopened; a stale record
    /// cannot absorb events; a record past its natural end plus grace padding
    /// belongs to a finished session
    fn can_be_updated(
        &self,
        candidate: &ScrobbleRecord,
        media: &TrackableMedia,
        now: DateTime<Utc>,
    ) -> bool {
        if !candidate.in_progress {
            return false;
        }

        let stale = self.policy.stale_seconds(media.kind());
        if (now - candidate.updated_at).num_seconds() > stale {
            return false;
        }

        // Chain-level completion for long-play media belongs to the
        // accumulator; a live session absorbs its own events regardless of
        // per-session position
        if media.is_long_play() {
            return true;
        }

        let assume = self.policy.assume_complete_when_runtime_unknown;
        if candidate.percent_played(media, assume) >= 100 {
            let natural_end = candidate.timestamp
                + Duration::seconds(media.run_time_seconds.unwrap_or(0))
                + Duration::seconds(self.policy.grace_seconds(media.kind()));
            if now > natural_end {
                return false;
            }
        }

        true
    }

    /// Percent the candidate would report with the incoming event applied
    fn incoming_percent(
        &self,
        candidate: &ScrobbleRecord,
        media: &TrackableMedia,
        event: &CanonicalEvent,
    ) -> u8 {
        if let Some(hint) = event.percent_hint {
            return hint.min(100);
        }
        let mut probe = candidate.clone();
        if let Some(position) = event.playback_position_seconds {
            probe.playback_position_seconds = Some(position);
        }
        probe.percent_played(media, self.policy.assume_complete_when_runtime_unknown)
    }

    fn completion_threshold(&self, media: &TrackableMedia, profile: &UserProfile) -> u8 {
        self.policy
            .completion_percent(media, profile.completion_override(media.kind()))
    }

    /// Update transition: merge the event into the candidate and persist once
    async fn apply_update(
        &self,
        mut record: ScrobbleRecord,
        media: &TrackableMedia,
        profile: &UserProfile,
        event: &CanonicalEvent,
    ) -> Result<ScrobbleRecord> {
        if !record.in_progress && event.status == PlaybackStatus::Stopped {
            debug!("Duplicate stop for finalized scrobble {}", record.guid);
            return Ok(record);
        }

        let now = self.clock.now();
        let assume = self.policy.assume_complete_when_runtime_unknown;

        if let Some(position) = event.playback_position_seconds {
            record.playback_position_seconds = Some(position);
        }
        if let Some(pages) = event.pages_read {
            record.book_pages_read = Some(pages);
        }
        if let Some(entry) = &event.log {
            record.append_log(entry.clone());
        }

        let mut status = event.status;
        let merged_percent = event
            .percent_hint
            .map(|hint| hint.min(100))
            .unwrap_or_else(|| record.percent_played(media, assume));
        if !media.is_long_play() && merged_percent >= self.completion_threshold(media, profile) {
            // Beyond the completion threshold the session is over no matter
            // what the source claims
            status = PlaybackStatus::Stopped;
        }

        match status {
            PlaybackStatus::Stopped => {
                record.stop_timestamp = Some(event.timestamp);
                record.played_to_completion = true;
                record.in_progress = false;
                record.is_paused = false;
                if record.playback_position_seconds.is_none() {
                    record.playback_position_seconds =
                        Some((event.timestamp - record.timestamp).num_seconds().max(0));
                }
                if media.is_long_play() {
                    let threshold = self.completion_threshold(media, profile);
                    longplay::finalize(&self.db, &mut record, media, threshold).await?;
                }
            }
            PlaybackStatus::Paused => {
                if record.is_paused {
                    warn!("Redundant pause for scrobble {}", record.guid);
                } else {
                    record.is_paused = true;
                }
            }
            PlaybackStatus::Resumed => {
                record.is_paused = false;
                record.in_progress = true;
            }
        }

        // "Last seen" even mid-pause; session start is never touched
        if status != PlaybackStatus::Resumed {
            record.stop_timestamp = Some(event.timestamp);
        }

        record.updated_at = now;
        records::update(&self.db, &record).await?;

        if record.in_progress {
            self.events
                .emit(ScrobbleEvent::ScrobbleUpdated {
                    scrobble_id: record.guid,
                    media: record.media,
                    user_id: record.user_id,
                    percent_played: record.percent_played(media, assume),
                    timestamp: now,
                })
                .ok();
        } else {
            self.events
                .emit(ScrobbleEvent::ScrobbleFinished {
                    scrobble_id: record.guid,
                    media: record.media,
                    user_id: record.user_id,
                    played_to_completion: record.played_to_completion,
                    timestamp: now,
                })
                .ok();
        }
        Ok(record)
    }

    /// Create transition: fresh record, finalized immediately when the event
    /// itself is terminal (imports feed finished sessions this way)
    async fn create(
        &self,
        media: &TrackableMedia,
        profile: &UserProfile,
        event: &CanonicalEvent,
    ) -> Result<ScrobbleRecord> {
        let now = self.clock.now();
        let mut record = ScrobbleRecord::start(
            media.media_ref,
            profile.user_id,
            event.timestamp,
            &event.source,
            &profile.timezone,
        );
        record.playback_position_seconds = event.playback_position_seconds;
        record.book_pages_read = event.pages_read;
        if let Some(entry) = &event.log {
            record.append_log(entry.clone());
        }

        match event.status {
            PlaybackStatus::Resumed => {}
            PlaybackStatus::Paused => {
                record.is_paused = true;
                record.stop_timestamp = Some(event.timestamp);
            }
            PlaybackStatus::Stopped => {
                // Imported listens stamp their start; the end is start plus
                // however long the session ran
                let session = event.playback_position_seconds.unwrap_or(0).max(0);
                record.stop_timestamp = Some(event.timestamp + Duration::seconds(session));
                record.played_to_completion = true;
                record.in_progress = false;
                if media.is_long_play() {
                    let threshold = self.completion_threshold(media, profile);
                    longplay::finalize(&self.db, &mut record, media, threshold).await?;
                }
            }
        }

        record.updated_at = now;
        let record = records::insert(&self.db, &record).await?;
        debug!(
            "Created scrobble {} for {} '{}'",
            record.guid, media.media_ref, media.title
        );

        self.events
            .emit(ScrobbleEvent::ScrobbleStarted {
                scrobble_id: record.guid,
                media: record.media,
                user_id: record.user_id,
                timestamp: now,
            })
            .ok();
        if !record.in_progress {
            self.events
                .emit(ScrobbleEvent::ScrobbleFinished {
                    scrobble_id: record.guid,
                    media: record.media,
                    user_id: record.user_id,
                    played_to_completion: record.played_to_completion,
                    timestamp: now,
                })
                .ok();
        }
        Ok(record)
    }

    /// Forcibly close a record: supersede, location handoff, or user action
    async fn force_finish_record(
        &self,
        mut record: ScrobbleRecord,
        media: &TrackableMedia,
        profile: &UserProfile,
    ) -> Result<ScrobbleRecord> {
        if !record.in_progress {
            return Ok(record);
        }
        let now = self.clock.now();
        let assume = self.policy.assume_complete_when_runtime_unknown;

        record.in_progress = false;
        record.is_paused = false;
        record.stop_timestamp = Some(now);
        if record.playback_position_seconds.is_none() {
            record.playback_position_seconds =
                Some((now - record.timestamp).num_seconds().max(0));
        }

        if media.is_long_play() {
            let threshold = self.completion_threshold(media, profile);
            longplay::finalize(&self.db, &mut record, media, threshold).await?;
            record.played_to_completion = record.long_play_complete == Some(true);
        } else {
            record.played_to_completion =
                record.percent_played(media, assume) >= self.completion_threshold(media, profile);
        }

        record.updated_at = now;
        records::update(&self.db, &record).await?;

        self.events
            .emit(ScrobbleEvent::ScrobbleFinished {
                scrobble_id: record.guid,
                media: record.media,
                user_id: record.user_id,
                played_to_completion: record.played_to_completion,
                timestamp: now,
            })
            .ok();
        Ok(record)
    }

    /// Public force-finish by guid, used by the HTTP surface
    pub async fn force_finish(&self, guid: Uuid) -> Result<ScrobbleRecord> {
        let record = records::get(&self.db, guid).await?;
        let media = catalog::get_media(&self.db, record.media).await?;
        let profile = lookup_user_profile(&self.db, record.user_id).await?;

        let lock_media = if media.kind() == MediaKind::Location {
            Uuid::nil()
        } else {
            media.media_ref.id
        };
        let _guard = self
            .key_lock((profile.user_id, media.kind(), lock_media))
            .await;
        self.force_finish_record(record, &media, &profile).await
    }

    /// Hard-delete a record by explicit user action
    pub async fn cancel(&self, guid: Uuid) -> Result<()> {
        records::delete(&self.db, guid).await?;
        self.events
            .emit(ScrobbleEvent::ScrobbleCancelled {
                scrobble_id: guid,
                timestamp: self.clock.now(),
            })
            .ok();
        Ok(())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrobd_common::clock::SystemClock;
    use scrobd_common::db::init::init_memory_database;

    #[tokio::test]
    async fn released_key_locks_are_pruned() {
        let db = init_memory_database().await.unwrap();
        let engine = Reconciler::new(
            db,
            ReconciliationPolicy::stock(),
            Arc::new(SystemClock),
            EventBus::new(8),
        );

        for _ in 0..16 {
            let guard = engine
                .key_lock((Uuid::new_v4(), MediaKind::Track, Uuid::new_v4()))
                .await;
            drop(guard);
        }

        // Only the slot being acquired survives; idle ones are gone
        let _guard = engine
            .key_lock((Uuid::nil(), MediaKind::Location, Uuid::nil()))
            .await;
        assert_eq!(engine.locks.lock().await.len(), 1);
    }
}
