//! Reconciliation policy
//!
//! One explicit configuration struct for every threshold the engine consults,
//! passed in at construction instead of read from process-wide settings at each
//! decision point. Values are seeded into the settings table and loaded from it
//! at startup; `Default` gives tests the same numbers without a database.

use std::collections::HashMap;

use crate::db::settings::get_setting;
use crate::error::Result;
use crate::media::{KindDefaults, MediaKind, TrackableMedia};
use sqlx::{Pool, Sqlite};

/// Per-kind override of the static registry values
#[derive(Debug, Clone, Copy, Default)]
pub struct KindOverride {
    pub completion_percent: Option<u8>,
    pub grace_seconds: Option<i64>,
    pub stale_seconds: Option<i64>,
}

/// Location reconciliation tuning
#[derive(Debug, Clone, Copy)]
pub struct LocationPolicy {
    /// How many historical fixes the movement test compares against
    pub history_window: usize,
    /// Coordinate delta separating GPS jitter from real movement, in degrees
    pub movement_epsilon_degrees: f64,
    /// Radius within which a known named place suppresses a new record
    pub known_place_radius_degrees: f64,
}

impl Default for LocationPolicy {
    fn default() -> Self {
        Self {
            history_window: 3,
            movement_epsilon_degrees: 0.001,
            known_place_radius_degrees: 0.002,
        }
    }
}

/// Long-play session segmentation tuning for granular page-turn streams
#[derive(Debug, Clone, Copy)]
pub struct LongPlayPolicy {
    /// Gap between consecutive page timestamps that starts a new session
    pub session_gap_seconds: i64,
    /// Page jump above which a gap is treated as skimming, not leaving
    pub session_page_jump: i64,
}

impl Default for LongPlayPolicy {
    fn default() -> Self {
        Self {
            session_gap_seconds: 1800,
            session_page_jump: 10,
        }
    }
}

/// All thresholds the reconciliation engine consults
#[derive(Debug, Clone)]
pub struct ReconciliationPolicy {
    pub overrides: HashMap<MediaKind, KindOverride>,
    pub location: LocationPolicy,
    pub long_play: LongPlayPolicy,
    /// Age past which a never-finished in-progress record is swept
    pub zombie_age_seconds: i64,
    /// When run time is unknown, report percent played as 100.
    ///
    /// This finalizes such records on first stop. It matches the historical
    /// behavior of the system this replaces and is deliberately a named policy
    /// choice rather than an implicit constant.
    pub assume_complete_when_runtime_unknown: bool,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self::stock()
    }
}

impl ReconciliationPolicy {
    /// Policy with stock defaults (zombie age 72h, unknown run time completes)
    pub fn stock() -> Self {
        Self {
            overrides: HashMap::new(),
            location: LocationPolicy::default(),
            long_play: LongPlayPolicy::default(),
            zombie_age_seconds: 259_200,
            assume_complete_when_runtime_unknown: true,
        }
    }

    /// Load tunable values from the settings table, falling back to stock
    pub async fn load(db: &Pool<Sqlite>) -> Result<Self> {
        let mut policy = Self::stock();

        if let Some(age) = get_setting::<i64>(db, "zombie_age_seconds").await? {
            policy.zombie_age_seconds = age;
        }
        if let Some(flag) = get_setting::<bool>(db, "assume_complete_when_runtime_unknown").await? {
            policy.assume_complete_when_runtime_unknown = flag;
        }
        if let Some(eps) = get_setting::<f64>(db, "location_movement_epsilon_degrees").await? {
            policy.location.movement_epsilon_degrees = eps;
        }
        if let Some(radius) = get_setting::<f64>(db, "location_known_place_radius_degrees").await? {
            policy.location.known_place_radius_degrees = radius;
        }
        if let Some(window) = get_setting::<i64>(db, "location_history_window").await? {
            policy.location.history_window = window.max(1) as usize;
        }
        if let Some(gap) = get_setting::<i64>(db, "long_play_session_gap_seconds").await? {
            policy.long_play.session_gap_seconds = gap;
        }
        if let Some(jump) = get_setting::<i64>(db, "long_play_session_page_jump").await? {
            policy.long_play.session_page_jump = jump;
        }

        Ok(policy)
    }

    /// Effective registry values for a kind, with overrides applied
    pub fn kind_policy(&self, kind: MediaKind) -> KindDefaults {
        let mut defaults = kind.defaults();
        if let Some(over) = self.overrides.get(&kind) {
            if let Some(pct) = over.completion_percent {
                defaults.completion_percent = pct;
            }
            if let Some(grace) = over.grace_seconds {
                defaults.grace_seconds = grace;
            }
            if let Some(stale) = over.stale_seconds {
                defaults.stale_seconds = stale;
            }
        }
        defaults
    }

    /// Completion threshold for one media entity
    ///
    /// Resolution order: per-media override, then per-user override for the
    /// kind, then the kind registry (with policy overrides applied).
    pub fn completion_percent(
        &self,
        media: &TrackableMedia,
        user_override: Option<u8>,
    ) -> u8 {
        media
            .completion_percent
            .or(user_override)
            .unwrap_or_else(|| self.kind_policy(media.kind()).completion_percent)
    }

    pub fn grace_seconds(&self, kind: MediaKind) -> i64 {
        self.kind_policy(kind).grace_seconds
    }

    pub fn stale_seconds(&self, kind: MediaKind) -> i64 {
        self.kind_policy(kind).stale_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaRef;
    use uuid::Uuid;

    fn media(kind: MediaKind, completion: Option<u8>) -> TrackableMedia {
        TrackableMedia {
            media_ref: MediaRef::new(kind, Uuid::new_v4()),
            title: "t".into(),
            subtitle: None,
            external_id: None,
            run_time_seconds: Some(100),
            total_pages: None,
            completion_percent: completion,
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn completion_resolution_order() {
        let policy = ReconciliationPolicy::stock();

        // Kind default
        assert_eq!(policy.completion_percent(&media(MediaKind::Track, None), None), 90);
        // User override beats kind default
        assert_eq!(
            policy.completion_percent(&media(MediaKind::Track, None), Some(80)),
            80
        );
        // Media override beats both
        assert_eq!(
            policy.completion_percent(&media(MediaKind::Track, Some(70)), Some(80)),
            70
        );
    }

    #[test]
    fn kind_override_applies() {
        let mut policy = ReconciliationPolicy::stock();
        policy.overrides.insert(
            MediaKind::Video,
            KindOverride {
                grace_seconds: Some(60),
                ..Default::default()
            },
        );
        assert_eq!(policy.grace_seconds(MediaKind::Video), 60);
        // Untouched fields keep registry values
        assert_eq!(policy.stale_seconds(MediaKind::Video), 14400);
    }
}
