//! The remote backend abstraction.
//!
//! Everything the engine needs from a server fits in three calls: push a
//! batch of queued mutations, pull rows changed since a cursor, and answer
//! "are you reachable". Both concrete implementations (`RestBackend`,
//! `TableBackend`) live in sibling modules and are chosen from configuration
//! at construction time, so the engine itself never branches on backend kind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stockline_core::{RemoteEntity, SyncRecord};

use crate::config::{BackendKind, SyncConfig};
use crate::error::EngineResult;
use crate::protocol::RecordFailure;
use crate::rest::RestBackend;
use crate::table::TableBackend;

/// Result of an upload phase: which records the server accepted and which
/// failed, with per-record errors. Records missing from both lists (a
/// misbehaving server) are treated as not acknowledged and retried later.
#[derive(Debug, Clone, Default)]
pub struct UploadOutcome {
    pub acked_ids: Vec<String>,
    pub failures: Vec<RecordFailure>,
}

#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Push queued mutations in FIFO order. Returns per-record outcomes;
    /// an `Err` means the whole batch could not be attempted (transport
    /// failure, auth rejection) and nothing should be marked synced.
    async fn upload_batch(
        &self,
        records: &[SyncRecord],
        cursor: Option<DateTime<Utc>>,
        device_id: &str,
    ) -> EngineResult<UploadOutcome>;

    /// Fetch all remote rows changed strictly after `cursor`. A `None`
    /// cursor means this device has never synced and everything is fetched.
    async fn download_since(
        &self,
        cursor: Option<DateTime<Utc>>,
        device_id: &str,
    ) -> EngineResult<Vec<RemoteEntity>>;

    /// Cheap reachability probe. Never errors; unreachable is just `false`.
    async fn check_health(&self) -> bool;
}

/// Build the backend selected by `config.backend.kind`.
pub fn build_backend(config: &SyncConfig) -> EngineResult<Arc<dyn SyncBackend>> {
    let timeout = Duration::from_secs(config.sync.request_timeout_secs);
    let backend: Arc<dyn SyncBackend> = match config.backend.kind {
        BackendKind::Rest => Arc::new(RestBackend::new(
            config.base_url(),
            config.backend.api_key.clone(),
            timeout,
        )?),
        BackendKind::Table => Arc::new(TableBackend::new(
            config.base_url(),
            config.backend.api_key.clone(),
            timeout,
        )?),
    };
    Ok(backend)
}
