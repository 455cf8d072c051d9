//! The sync engine.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          sync_now()                                │
//! │                                                                    │
//! │  acquire guard ──► UPLOAD PHASE ──► DOWNLOAD PHASE ──► finalize    │
//! │  (one cycle at    drain queue       fetch since        persist     │
//! │   a time)         FIFO, respect     cursor, classify   cursor,     │
//! │                   backoff, mark     each row, apply /  publish     │
//! │                   synced/failed     resolve / surface  state       │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine is a cheap-to-clone handle over shared internals, so the
//! scheduler, enqueue hooks and the UI layer all drive the same instance.
//! Only one sync cycle runs at a time; concurrent callers get
//! `SyncError::SyncInProgress` immediately instead of queueing behind the
//! running cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use stockline_core::{
    classify_download, merge_payloads, ApplyDecision, ConflictKind, ConflictResolution,
    RecordError, RemoteEntity, SyncConflict, SyncEntity, SyncOperation, SyncRecord, SyncResult,
    SyncState, SyncStatus,
};
use stockline_db::Database;

use crate::backend::{build_backend, SyncBackend};
use crate::config::{ConflictPolicy, SyncConfig, SyncSettings};
use crate::conflicts::{ConflictStore, PendingConflict};
use crate::error::{EngineResult, SyncError};
use crate::scheduler::{SchedulerHandle, SyncScheduler};
use crate::state::{StatePublisher, Subscription};

/// Ceiling for the per-record retry backoff.
const MAX_BACKOFF_SECS: u64 = 3600;

// =============================================================================
// Cycle guard
// =============================================================================

/// Holds the "a cycle is running" flag; released on drop so an early `?`
/// return cannot leave the engine wedged.
struct CycleGuard {
    flag: Arc<AtomicBool>,
}

impl CycleGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> EngineResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SyncError::SyncInProgress)?;
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Clone)]
pub struct SyncEngine {
    db: Database,
    backend: Arc<RwLock<Arc<dyn SyncBackend>>>,
    /// When the backend was handed in by the caller it is never rebuilt
    /// from configuration changes.
    injected_backend: bool,
    config: Arc<RwLock<SyncConfig>>,
    state: Arc<StatePublisher>,
    conflicts: Arc<ConflictStore>,
    syncing: Arc<AtomicBool>,
    scheduler: Arc<StdMutex<Option<SchedulerHandle>>>,
}

impl SyncEngine {
    /// Build an engine with the backend selected by `config.backend.kind`.
    pub fn new(config: SyncConfig, db: Database) -> EngineResult<Self> {
        config.validate()?;
        let backend = build_backend(&config)?;
        Ok(Self::assemble(config, db, backend, false))
    }

    /// Build an engine around a caller-supplied backend.
    pub fn with_backend(
        config: SyncConfig,
        db: Database,
        backend: Arc<dyn SyncBackend>,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, db, backend, true))
    }

    fn assemble(
        config: SyncConfig,
        db: Database,
        backend: Arc<dyn SyncBackend>,
        injected_backend: bool,
    ) -> Self {
        Self {
            db,
            backend: Arc::new(RwLock::new(backend)),
            injected_backend,
            config: Arc::new(RwLock::new(config)),
            state: StatePublisher::new(SyncState::default()),
            conflicts: Arc::new(ConflictStore::new()),
            syncing: Arc::new(AtomicBool::new(false)),
            scheduler: Arc::new(StdMutex::new(None)),
        }
    }

    /// Probe the backend, load persisted sync position and start the
    /// background scheduler. Call once after construction.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> EngineResult<()> {
        let cursor = self.db.meta().load_cursor().await?;
        let pending = self.db.sync_queue().count_pending().await?;
        let online = self.current_backend().check_health().await;

        self.state.update(|s| {
            s.status = if online {
                SyncStatus::Idle
            } else {
                SyncStatus::Offline
            };
            s.is_online = online;
            s.last_sync_at = cursor;
            s.pending_operations = pending;
        });

        let interval_secs = self.config.read().unwrap().sync.sync_interval_secs;
        if interval_secs > 0 {
            self.start_scheduler(interval_secs);
        }

        info!(online, pending, ?cursor, "sync engine initialized");
        Ok(())
    }

    fn current_backend(&self) -> Arc<dyn SyncBackend> {
        Arc::clone(&self.backend.read().unwrap())
    }

    fn start_scheduler(&self, interval_secs: u64) {
        let handle = SyncScheduler::spawn(self.clone(), Duration::from_secs(interval_secs));
        self.state
            .update(|s| s.next_sync_at = Some(Utc::now() + ChronoDuration::seconds(interval_secs as i64)));
        *self.scheduler.lock().unwrap() = Some(handle);
    }

    // =========================================================================
    // Queueing
    // =========================================================================

    /// Record a local mutation for eventual upload. If the engine is idle
    /// and the backend looks reachable, a sync cycle is kicked off in the
    /// background immediately.
    #[instrument(skip(self, payload), fields(entity = %entity, operation = %operation))]
    pub async fn queue_operation(
        &self,
        entity: SyncEntity,
        operation: SyncOperation,
        payload: Value,
    ) -> EngineResult<()> {
        let record = SyncRecord::new(entity, operation, payload);
        self.db.sync_queue().enqueue(&record).await?;

        let pending = self.db.sync_queue().count_pending().await?;
        self.state.update(|s| s.pending_operations = pending);
        debug!(record_id = %record.id, pending, "operation queued");

        let snapshot = self.state.snapshot();
        if snapshot.is_online && snapshot.status != SyncStatus::Syncing {
            self.spawn_opportunistic_sync();
        }
        Ok(())
    }

    fn spawn_opportunistic_sync(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            match engine.sync_now().await {
                Ok(_) => {}
                Err(SyncError::SyncInProgress) => {
                    debug!("opportunistic sync skipped, cycle already running");
                }
                Err(err) => debug!(error = %err, "opportunistic sync failed"),
            }
        });
    }

    // =========================================================================
    // Sync cycle
    // =========================================================================

    /// Run one full upload + download cycle.
    ///
    /// Record-level failures never abort the cycle; they are reported in the
    /// returned `SyncResult` and retried on later cycles. Only transport or
    /// store failures abort, returning `Err`.
    #[instrument(skip(self))]
    pub async fn sync_now(&self) -> EngineResult<SyncResult> {
        let _guard = CycleGuard::acquire(&self.syncing)?;

        self.state.update(|s| {
            s.status = SyncStatus::Syncing;
            s.error_message = None;
        });
        info!("sync cycle starting");

        match self.run_cycle().await {
            Ok(result) => {
                let pending = self.db.sync_queue().count_pending().await.unwrap_or(0);
                self.state.update(|s| {
                    s.status = SyncStatus::Success;
                    s.last_sync_at = Some(result.timestamp);
                    s.pending_operations = pending;
                    s.is_online = true;
                    s.error_message = None;
                });
                info!(
                    synced = result.synced_records,
                    conflicts = result.conflicts.len(),
                    errors = result.errors.len(),
                    "sync cycle complete"
                );
                Ok(result)
            }
            Err(err) => {
                let offline = matches!(
                    &err,
                    SyncError::Http(e) if e.is_connect() || e.is_timeout()
                );
                warn!(error = %err, offline, "sync cycle failed");
                self.state.update(|s| {
                    s.status = if offline {
                        SyncStatus::Offline
                    } else {
                        SyncStatus::Error
                    };
                    if offline {
                        s.is_online = false;
                    }
                    s.error_message = Some(err.to_string());
                });
                Err(err)
            }
        }
    }

    async fn run_cycle(&self) -> EngineResult<SyncResult> {
        let (settings, device_id) = {
            let config = self.config.read().unwrap();
            (config.sync.clone(), config.device.id.clone())
        };
        let backend = self.current_backend();
        let cursor = self.db.meta().load_cursor().await?;

        let mut synced_records = 0u64;
        let mut errors = Vec::new();

        self.upload_phase(&*backend, &settings, &device_id, cursor, &mut synced_records, &mut errors)
            .await?;
        let surfaced = self
            .download_phase(&*backend, &settings, &device_id, cursor, &mut synced_records, &mut errors)
            .await?;

        // The cursor only advances after both phases land, so a crash
        // mid-cycle re-downloads rather than skips.
        let timestamp = Utc::now();
        self.db.meta().save_cursor(timestamp).await?;

        Ok(SyncResult {
            success: errors.is_empty(),
            synced_records,
            conflicts: surfaced,
            errors,
            timestamp,
        })
    }

    /// Drain the queue in FIFO order, skipping records that are inside
    /// their backoff window. Records past their retry budget are filtered
    /// out at the query level so they cannot clog the batch window.
    async fn upload_phase(
        &self,
        backend: &dyn SyncBackend,
        settings: &SyncSettings,
        device_id: &str,
        cursor: Option<DateTime<Utc>>,
        synced_records: &mut u64,
        errors: &mut Vec<RecordError>,
    ) -> EngineResult<()> {
        let queue = self.db.sync_queue();
        let pending = queue
            .get_pending(settings.batch_size as u32, settings.max_retries)
            .await?;
        if pending.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut eligible = Vec::new();
        for record in pending {
            if in_backoff_window(&record, now, settings.initial_backoff_secs) {
                debug!(record_id = %record.id, "record still backing off");
            } else {
                eligible.push(record);
            }
        }
        if eligible.is_empty() {
            return Ok(());
        }

        let outcome = backend.upload_batch(&eligible, cursor, device_id).await?;
        let by_id: HashMap<&str, &SyncRecord> =
            eligible.iter().map(|r| (r.id.as_str(), r)).collect();

        for id in &outcome.acked_ids {
            queue.mark_synced(id).await?;
            *synced_records += 1;
        }
        for failure in &outcome.failures {
            match by_id.get(failure.id.as_str()) {
                Some(record) => {
                    queue.mark_failed(&record.id, &failure.error).await?;
                    errors.push(RecordError {
                        record_id: record.id.clone(),
                        entity: record.entity,
                        operation: record.operation,
                        message: failure.error.clone(),
                        retryable: failure.retryable,
                    });
                }
                None => warn!(
                    record_id = %failure.id,
                    "server reported a failure for a record outside this batch"
                ),
            }
        }
        Ok(())
    }

    /// Pull remote changes since the cursor and fold them into the local
    /// store, classifying each row against the local copy.
    async fn download_phase(
        &self,
        backend: &dyn SyncBackend,
        settings: &SyncSettings,
        device_id: &str,
        cursor: Option<DateTime<Utc>>,
        synced_records: &mut u64,
        errors: &mut Vec<RecordError>,
    ) -> EngineResult<Vec<SyncConflict>> {
        let entities = self.db.entities();
        let remotes = backend.download_since(cursor, device_id).await?;
        let mut surfaced = Vec::new();

        for remote in remotes {
            let local_updated = entities.get_updated_at(remote.entity, &remote.id).await?;
            match classify_download(local_updated, &remote) {
                ApplyDecision::Apply | ApplyDecision::SoftDelete => {
                    match entities.apply_remote(&remote).await {
                        Ok(()) => *synced_records += 1,
                        Err(err) => {
                            warn!(
                                entity = %remote.entity,
                                id = %remote.id,
                                error = %err,
                                "failed to apply remote row"
                            );
                            errors.push(apply_failure(&remote, &err));
                        }
                    }
                }
                ApplyDecision::Conflict(kind) => match settings.conflict_policy {
                    ConflictPolicy::RemoteWins => {
                        entities.apply_remote(&remote).await?;
                        *synced_records += 1;
                        debug!(
                            entity = %remote.entity,
                            id = %remote.id,
                            "conflict auto-resolved, remote wins"
                        );
                    }
                    ConflictPolicy::LocalWins => {
                        // Local row stays put; re-upload it so the server
                        // converges to this device's version.
                        if let Some(row) = entities.get(remote.entity, &remote.id).await? {
                            let record =
                                SyncRecord::new(remote.entity, SyncOperation::Update, row.data);
                            self.db.sync_queue().enqueue(&record).await?;
                            debug!(
                                entity = %remote.entity,
                                id = %remote.id,
                                "conflict auto-resolved, local wins, re-queued for upload"
                            );
                        }
                    }
                    ConflictPolicy::Manual => {
                        let local_data = entities
                            .get(remote.entity, &remote.id)
                            .await?
                            .map(|row| row.data)
                            .unwrap_or(Value::Null);
                        let conflict = SyncConflict::new(
                            remote.entity,
                            remote.id.clone(),
                            local_data,
                            remote.data.clone(),
                            kind,
                        );
                        info!(
                            conflict_id = %conflict.id,
                            entity = %remote.entity,
                            id = %remote.id,
                            ?kind,
                            "conflict surfaced for manual resolution"
                        );
                        surfaced.push(conflict.clone());
                        self.conflicts.upsert(PendingConflict { conflict, remote });
                    }
                },
            }
        }
        Ok(surfaced)
    }

    // =========================================================================
    // Conflicts
    // =========================================================================

    pub fn pending_conflicts(&self) -> Vec<SyncConflict> {
        self.conflicts.list()
    }

    /// Apply a resolution to a surfaced conflict. Resolution is terminal on
    /// success: the id is gone and a second call returns `ConflictNotFound`.
    /// On failure the conflict is restored so it can be retried.
    #[instrument(skip(self))]
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
    ) -> EngineResult<()> {
        let pending = self
            .conflicts
            .take(conflict_id)
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;

        match self.apply_resolution(&pending, resolution).await {
            Ok(()) => {
                info!(conflict_id, ?resolution, "conflict resolved");
                Ok(())
            }
            Err(err) => {
                self.conflicts.upsert(pending);
                Err(err)
            }
        }
    }

    async fn apply_resolution(
        &self,
        pending: &PendingConflict,
        resolution: ConflictResolution,
    ) -> EngineResult<()> {
        let conflict = &pending.conflict;
        match resolution {
            ConflictResolution::Local => {
                // Local row is already what we want; push it to the server.
                self.queue_operation(
                    conflict.entity,
                    SyncOperation::Update,
                    conflict.local_data.clone(),
                )
                .await?;
            }
            ConflictResolution::Remote => {
                // Applies the server's timestamps and version, including
                // tombstones for deleted-while-modified conflicts.
                self.db.entities().apply_remote(&pending.remote).await?;
            }
            ConflictResolution::Merge => {
                if conflict.kind != ConflictKind::ConcurrentEdit {
                    return Err(SyncError::InvalidResolution {
                        id: conflict.id.clone(),
                        resolution: "merge".to_string(),
                        reason: "merge needs live data on both sides".to_string(),
                    });
                }
                let merged = merge_payloads(&conflict.local_data, &pending.remote.data)?;
                self.db
                    .entities()
                    .upsert_local(conflict.entity, &conflict.entity_id, &merged, Utc::now())
                    .await?;
                self.queue_operation(conflict.entity, SyncOperation::Update, merged)
                    .await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // State and configuration
    // =========================================================================

    pub fn state(&self) -> SyncState {
        self.state.snapshot()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&SyncState) + Send + Sync + 'static,
    ) -> Subscription {
        self.state.subscribe(listener)
    }

    pub fn config(&self) -> SyncConfig {
        self.config.read().unwrap().clone()
    }

    /// Change configuration in place. Backend settings rebuild the backend
    /// client; an interval change restarts the scheduler. Everything else
    /// takes effect on the next cycle.
    pub async fn update_config(
        &self,
        apply: impl FnOnce(&mut SyncConfig),
    ) -> EngineResult<()> {
        let (updated, backend_changed, interval_changed) = {
            let mut config = self.config.write().unwrap();
            let mut candidate = config.clone();
            apply(&mut candidate);
            candidate.validate()?;

            let backend_changed = candidate.backend != config.backend
                || candidate.sync.request_timeout_secs != config.sync.request_timeout_secs;
            let interval_changed =
                candidate.sync.sync_interval_secs != config.sync.sync_interval_secs;
            *config = candidate.clone();
            (candidate, backend_changed, interval_changed)
        };

        if backend_changed && !self.injected_backend {
            let backend = build_backend(&updated)?;
            *self.backend.write().unwrap() = backend;
            info!(kind = %updated.backend.kind, "backend client rebuilt");
        }

        if interval_changed {
            let old = self.scheduler.lock().unwrap().take();
            if let Some(handle) = old {
                handle.shutdown().await;
            }
            if updated.sync.sync_interval_secs > 0 {
                self.start_scheduler(updated.sync.sync_interval_secs);
            } else {
                self.state.update(|s| s.next_sync_at = None);
            }
            info!(
                interval_secs = updated.sync.sync_interval_secs,
                "scheduler restarted"
            );
        }
        Ok(())
    }

    /// Report a connectivity change (from the platform's network monitor).
    /// Coming back online with work queued kicks off a background sync.
    pub fn set_online(&self, online: bool) {
        self.state.update(|s| {
            s.is_online = online;
            if !online {
                s.status = SyncStatus::Offline;
            } else if s.status == SyncStatus::Offline {
                s.status = SyncStatus::Idle;
            }
        });

        if online && self.state.snapshot().pending_operations > 0 {
            info!("back online with queued work, starting sync");
            self.spawn_opportunistic_sync();
        }
    }

    pub(crate) fn note_next_sync(&self, next: Option<DateTime<Utc>>) {
        self.state.update(|s| s.next_sync_at = next);
    }

    // =========================================================================
    // Maintenance and shutdown
    // =========================================================================

    /// Delete synced queue records older than the retention window.
    /// Returns how many were removed.
    pub async fn run_maintenance(&self) -> EngineResult<u64> {
        let days = self.config.read().unwrap().sync.retention_days;
        let removed = self.db.sync_queue().cleanup_synced(days).await?;
        info!(removed, days, "queue maintenance complete");
        Ok(removed)
    }

    /// Stop the background scheduler. A cycle already in flight finishes.
    pub async fn shutdown(&self) {
        let handle = self.scheduler.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        info!("sync engine shut down");
    }
}

/// Failing to apply a downloaded row is terminal for that row: the cursor
/// still advances past it, so the engine will not re-download it on its own.
fn apply_failure(remote: &RemoteEntity, err: &stockline_db::DbError) -> RecordError {
    RecordError {
        record_id: remote.id.clone(),
        entity: remote.entity,
        operation: SyncOperation::Update,
        message: err.to_string(),
        retryable: false,
    }
}

/// Whether a previously failed record is still waiting out its exponential
/// backoff. Delay doubles per failed attempt, capped at an hour.
fn in_backoff_window(record: &SyncRecord, now: DateTime<Utc>, initial_backoff_secs: u64) -> bool {
    if record.retry_count == 0 {
        return false;
    }
    let Some(attempted_at) = record.attempted_at else {
        return false;
    };
    let exp = (record.retry_count - 1).clamp(0, 20) as u32;
    let delay_secs = initial_backoff_secs
        .saturating_mul(1u64 << exp.min(20))
        .min(MAX_BACKOFF_SECS);
    now < attempted_at + ChronoDuration::seconds(delay_secs as i64)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failed_record(retry_count: i64, attempted_secs_ago: i64) -> SyncRecord {
        let mut record = SyncRecord::new(
            SyncEntity::Product,
            SyncOperation::Update,
            json!({ "id": "p1" }),
        );
        record.retry_count = retry_count;
        record.attempted_at = Some(Utc::now() - ChronoDuration::seconds(attempted_secs_ago));
        record
    }

    #[test]
    fn fresh_records_are_never_in_backoff() {
        let record = SyncRecord::new(
            SyncEntity::Product,
            SyncOperation::Create,
            json!({ "id": "p1" }),
        );
        assert!(!in_backoff_window(&record, Utc::now(), 30));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let now = Utc::now();
        // 1 failure: 30s delay. Attempted 10s ago -> still waiting.
        assert!(in_backoff_window(&failed_record(1, 10), now, 30));
        assert!(!in_backoff_window(&failed_record(1, 31), now, 30));
        // 3 failures: 120s delay.
        assert!(in_backoff_window(&failed_record(3, 100), now, 30));
        assert!(!in_backoff_window(&failed_record(3, 121), now, 30));
    }

    #[test]
    fn backoff_caps_at_one_hour() {
        let now = Utc::now();
        assert!(!in_backoff_window(&failed_record(30, 3601), now, 30));
        assert!(in_backoff_window(&failed_record(30, 3599), now, 30));
    }

    #[test]
    fn download_apply_failures_are_not_retryable() {
        let remote = RemoteEntity {
            id: "p1".to_string(),
            entity: SyncEntity::Product,
            data: json!({ "id": "p1", "name": "Widget" }),
            updated_at: Utc::now(),
            deleted_at: None,
            version: 2,
        };
        let err = stockline_db::DbError::NotFound {
            entity: "products".to_string(),
            id: "p1".to_string(),
        };

        let failure = apply_failure(&remote, &err);
        assert_eq!(failure.record_id, "p1");
        assert_eq!(failure.entity, SyncEntity::Product);
        assert!(!failure.retryable);
    }

    #[test]
    fn cycle_guard_is_exclusive_and_releases_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = CycleGuard::acquire(&flag).unwrap();
        assert!(matches!(
            CycleGuard::acquire(&flag),
            Err(SyncError::SyncInProgress)
        ));
        drop(guard);
        assert!(CycleGuard::acquire(&flag).is_ok());
    }
}
