//! Background jobs
//!
//! The zombie sweep deletes in-progress records that were never finished and
//! have sat untouched past the configured age. It runs on an interval and is
//! also exposed as an operation with a dry-run mode.

use std::sync::Arc;

use chrono::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::Reconciler;
use crate::error::Result;
use scrobd_common::db::records;

#[derive(Debug, Clone, Copy)]
pub struct SweepOutcome {
    pub candidates: usize,
    /// 0 on a dry run
    pub deleted: u64,
}

/// Sweep zombie records: count on a dry run, delete otherwise
///
/// Paused records are exempt; a paused session is deliberate, not abandoned.
pub async fn zombie_sweep(engine: &Reconciler, dry_run: bool) -> Result<SweepOutcome> {
    let cutoff = engine.now() - Duration::seconds(engine.policy().zombie_age_seconds);
    let zombies = records::zombie_candidates(engine.db(), cutoff).await?;
    let candidates = zombies.len();

    if dry_run {
        info!("Zombie sweep (dry run): {} candidates", candidates);
        return Ok(SweepOutcome {
            candidates,
            deleted: 0,
        });
    }

    let guids: Vec<Uuid> = zombies.iter().map(|r| r.guid).collect();
    let deleted = records::delete_many(engine.db(), &guids).await?;
    if deleted > 0 {
        info!("Zombie sweep deleted {} records", deleted);
    }
    Ok(SweepOutcome {
        candidates,
        deleted,
    })
}

/// Run the sweep forever on an interval
pub fn spawn_sweep_loop(engine: Arc<Reconciler>, interval_seconds: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(interval_seconds.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = zombie_sweep(&engine, false).await {
                warn!("Zombie sweep failed: {}", e);
            }
        }
    })
}
