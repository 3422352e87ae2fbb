//! Shared test harness: in-memory database, manual clock, stock policy
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use scrobd_common::clock::{Clock, ManualClock};
use scrobd_common::db::init::init_memory_database;
use scrobd_common::db::media::find_or_create_media;
use scrobd_common::db::users::{anonymous_user_id, lookup_user_profile, UserProfile};
use scrobd_common::events::EventBus;
use scrobd_common::media::{MediaIdentity, MediaKind, TrackableMedia};
use scrobd_common::policy::ReconciliationPolicy;
use scrobd_server::engine::Reconciler;
use scrobd_server::normalize::{CanonicalEvent, PlaybackStatus};

pub struct Harness {
    pub engine: Arc<Reconciler>,
    pub clock: Arc<ManualClock>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub async fn harness() -> Harness {
    harness_with_policy(ReconciliationPolicy::stock()).await
}

pub async fn harness_with_policy(policy: ReconciliationPolicy) -> Harness {
    let db = init_memory_database().await.expect("in-memory db");
    let clock = Arc::new(ManualClock::new(start_time()));
    let engine = Arc::new(Reconciler::new(
        db,
        policy,
        clock.clone(),
        EventBus::new(64),
    ));
    Harness { engine, clock }
}

impl Harness {
    pub async fn anon(&self) -> UserProfile {
        lookup_user_profile(self.engine.db(), anonymous_user_id())
            .await
            .expect("anonymous profile")
    }

    pub async fn media(
        &self,
        kind: MediaKind,
        title: &str,
        subtitle: &str,
        run_time: Option<i64>,
    ) -> TrackableMedia {
        find_or_create_media(
            self.engine.db(),
            kind,
            &MediaIdentity {
                title: Some(title.to_string()),
                subtitle: Some(subtitle.to_string()),
                run_time_seconds: run_time,
                ..Default::default()
            },
        )
        .await
        .expect("media fixture")
    }

    /// Pin a per-media completion override directly on the catalog row and
    /// return the refreshed entity
    pub async fn set_media_completion(
        &self,
        media: &TrackableMedia,
        percent: u8,
    ) -> TrackableMedia {
        sqlx::query("UPDATE media SET completion_percent = ? WHERE guid = ?")
            .bind(percent as i64)
            .bind(media.media_ref.id.to_string())
            .execute(self.engine.db())
            .await
            .expect("completion override");
        scrobd_common::db::media::get_media(self.engine.db(), media.media_ref)
            .await
            .expect("refreshed media")
    }

    /// Event stamped at the harness clock's current instant
    pub fn event(&self, status: PlaybackStatus, position: Option<i64>) -> CanonicalEvent {
        let mut event = CanonicalEvent::new(self.clock.now(), status, "test");
        event.playback_position_seconds = position;
        event
    }

    pub async fn in_progress_count(&self, media: &TrackableMedia, user: Uuid) -> i64 {
        scrobd_common::db::records::in_progress_count(self.engine.db(), media.media_ref, user)
            .await
            .expect("in-progress count")
    }
}
