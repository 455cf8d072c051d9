//! Background sync scheduler.
//!
//! A single tokio task that calls `sync_now()` on a fixed interval. The
//! first tick fires one full interval after spawn, not immediately; callers
//! wanting an immediate sync call `sync_now()` themselves. Ticks are skipped
//! while offline and while another cycle is running, so the scheduler can
//! never pile up work.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::SyncEngine;
use crate::error::SyncError;

pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawn the interval task. The returned handle stops it; dropping the
    /// handle stops it too.
    pub fn spawn(engine: SyncEngine, interval: Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "sync scheduler started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately on the first tick; consume it so
            // the schedule starts one interval out.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::run_tick(&engine, interval).await;
                    }
                    // None means every handle was dropped.
                    _ = shutdown_rx.recv() => {
                        info!("sync scheduler stopping");
                        break;
                    }
                }
            }
        });

        SchedulerHandle { shutdown_tx }
    }

    async fn run_tick(engine: &SyncEngine, interval: Duration) {
        if !engine.state().is_online {
            debug!("scheduled sync skipped, offline");
        } else {
            match engine.sync_now().await {
                Ok(result) => debug!(
                    synced = result.synced_records,
                    conflicts = result.conflicts.len(),
                    "scheduled sync complete"
                ),
                Err(SyncError::SyncInProgress) => {
                    debug!("scheduled sync skipped, cycle already running");
                }
                Err(err) => warn!(error = %err, "scheduled sync failed"),
            }
        }
        engine.note_next_sync(Some(
            Utc::now() + ChronoDuration::seconds(interval.as_secs() as i64),
        ));
    }
}

/// Stops the scheduler task when told to, or when dropped.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    /// Ask the task to stop. A cycle already in flight finishes on its own.
    pub async fn shutdown(&self) {
        // A send error means the task is already gone, which is fine.
        let _ = self.shutdown_tx.send(()).await;
    }
}
