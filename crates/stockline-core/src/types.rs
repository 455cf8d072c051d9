//! # Sync Domain Types
//!
//! Core types used throughout the Stockline sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sync Domain Types                              │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SyncRecord    │   │    SyncState    │   │   SyncResult    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  status         │   │  success        │       │
//! │  │  entity         │   │  last_sync_at   │   │  synced_records │       │
//! │  │  operation      │   │  pending_ops    │   │  conflicts      │       │
//! │  │  payload (JSON) │   │  is_online      │   │  errors         │       │
//! │  │  synced_at?     │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  SyncConflict   │   │  RemoteEntity   │   │  RecordError    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  local_data     │   │  data (JSON)    │   │  message        │       │
//! │  │  remote_data    │   │  updated_at     │   │  retryable      │       │
//! │  │  kind           │   │  deleted_at?    │   └─────────────────┘       │
//! │  └─────────────────┘   │  version        │                             │
//! │                        └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timestamp Convention
//! All timestamps are UTC and serialize as RFC 3339 strings. Queue FIFO
//! ordering and the download cursor both rely on this single convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::DomainError;

// =============================================================================
// Sync Entity
// =============================================================================

/// The entity kinds tracked by the sync engine.
///
/// Each variant maps 1:1 onto a local mirror table and a remote table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntity {
    Product,
    Category,
    Sale,
    StockAdjustment,
}

impl SyncEntity {
    /// All tracked entity kinds, in download order.
    pub const ALL: [SyncEntity; 4] = [
        SyncEntity::Product,
        SyncEntity::Category,
        SyncEntity::Sale,
        SyncEntity::StockAdjustment,
    ];

    /// Returns the table name for this entity (local mirror and remote).
    pub const fn table_name(&self) -> &'static str {
        match self {
            SyncEntity::Product => "products",
            SyncEntity::Category => "categories",
            SyncEntity::Sale => "sales",
            SyncEntity::StockAdjustment => "stock_adjustments",
        }
    }

    /// Returns the wire identifier used in queue rows and payloads.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncEntity::Product => "product",
            SyncEntity::Category => "category",
            SyncEntity::Sale => "sale",
            SyncEntity::StockAdjustment => "stock_adjustment",
        }
    }
}

impl std::fmt::Display for SyncEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncEntity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(SyncEntity::Product),
            "category" => Ok(SyncEntity::Category),
            "sale" => Ok(SyncEntity::Sale),
            "stock_adjustment" => Ok(SyncEntity::StockAdjustment),
            other => Err(DomainError::UnknownEntity(other.to_string())),
        }
    }
}

// =============================================================================
// Sync Operation
// =============================================================================

/// The mutation kind carried by a queue record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    /// Deletes propagate as soft deletes (`deleted_at` on the remote row).
    Delete,
}

impl SyncOperation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncOperation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncOperation::Create),
            "update" => Ok(SyncOperation::Update),
            "delete" => Ok(SyncOperation::Delete),
            other => Err(DomainError::UnknownOperation(other.to_string())),
        }
    }
}

// =============================================================================
// Sync Record (queue entry)
// =============================================================================

/// A queued local mutation awaiting upload.
///
/// ## Lifecycle
/// Created by `enqueue` with `synced_at = None`; the engine is the only
/// writer afterwards. `synced_at` transitions `None → Some` exactly once
/// and never back. Synced rows linger until the retention pass removes
/// them.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncRecord {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Entity kind this mutation applies to.
    pub entity: SyncEntity,

    /// Mutation kind.
    pub operation: SyncOperation,

    /// Full entity payload as JSON. Opaque to the engine.
    #[ts(type = "unknown")]
    pub payload: Value,

    /// Number of failed upload attempts so far.
    pub retry_count: i64,

    /// Error message from the most recent failed attempt.
    pub last_error: Option<String>,

    /// Creation instant. FIFO ordering key for the queue.
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// When an upload was last attempted (success or failure).
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,

    /// When the record was acknowledged by the backend.
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncRecord {
    /// Constructs a fresh unsynced record with a generated id.
    pub fn new(entity: SyncEntity, operation: SyncOperation, payload: Value) -> Self {
        SyncRecord {
            id: Uuid::new_v4().to_string(),
            entity,
            operation,
            payload,
            retry_count: 0,
            last_error: None,
            created_at: Utc::now(),
            attempted_at: None,
            synced_at: None,
        }
    }

    /// Whether this record has been acknowledged.
    #[inline]
    pub fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }

    /// The entity id carried in the payload, when present.
    ///
    /// Payloads are entity-shaped JSON objects with an `id` field; a
    /// payload without one is still uploadable but cannot be matched
    /// against remote rows.
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(Value::as_str)
    }
}

// =============================================================================
// Sync State
// =============================================================================

/// Engine lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No sync attempt running; queue may or may not be empty.
    #[default]
    Idle,
    /// A sync attempt is in flight. At most one at a time.
    Syncing,
    /// The last attempt completed (possibly with per-record errors).
    Success,
    /// The last attempt aborted with an orchestration-level error.
    Error,
    /// The backend is unreachable; automatic sync is gated off.
    Offline,
}

/// Process-wide sync state, published to subscribers on every transition.
///
/// Exactly one instance exists per running engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncState {
    /// Current engine status.
    pub status: SyncStatus,

    /// Completion time of the last successful attempt.
    #[ts(as = "Option<String>")]
    pub last_sync_at: Option<DateTime<Utc>>,

    /// When the scheduler will next attempt a sync (if enabled).
    #[ts(as = "Option<String>")]
    pub next_sync_at: Option<DateTime<Utc>>,

    /// Number of unsynced queue records.
    pub pending_operations: i64,

    /// Last orchestration-level failure description.
    pub error_message: Option<String>,

    /// Current connectivity assumption.
    pub is_online: bool,
}

// =============================================================================
// Conflicts
// =============================================================================

/// Why a local/remote pair could not be reconciled automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Payloads differ with no clear timestamp winner.
    DataMismatch,
    /// Both sides modified the entity since the last successful sync.
    ConcurrentEdit,
    /// Remote soft-deleted an entity the local side modified afterwards.
    DeletedModified,
}

/// A local/remote version pair awaiting explicit resolution.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncConflict {
    /// Unique conflict identifier (UUID v4).
    pub id: String,

    /// Entity kind of the conflicting row.
    pub entity: SyncEntity,

    /// Id of the conflicting entity.
    pub entity_id: String,

    /// The local payload at detection time.
    #[ts(type = "unknown")]
    pub local_data: Value,

    /// The remote payload that could not be applied.
    #[ts(type = "unknown")]
    pub remote_data: Value,

    /// Conflict classification.
    pub kind: ConflictKind,

    /// When the conflict was detected.
    #[ts(as = "String")]
    pub detected_at: DateTime<Utc>,
}

impl SyncConflict {
    pub fn new(entity: SyncEntity, entity_id: String, local_data: Value, remote_data: Value, kind: ConflictKind) -> Self {
        SyncConflict {
            id: Uuid::new_v4().to_string(),
            entity,
            entity_id,
            local_data,
            remote_data,
            kind,
            detected_at: Utc::now(),
        }
    }
}

/// Caller's choice when resolving a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local payload and re-upload it.
    Local,
    /// Overwrite the local row with the remote payload.
    Remote,
    /// Shallow field merge (remote base, local keys win), then re-upload.
    Merge,
}

impl std::str::FromStr for ConflictResolution {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ConflictResolution::Local),
            "remote" => Ok(ConflictResolution::Remote),
            "merge" => Ok(ConflictResolution::Merge),
            other => Err(DomainError::UnknownResolution(other.to_string())),
        }
    }
}

// =============================================================================
// Per-Record Errors
// =============================================================================

/// A per-record failure reported in a [`SyncResult`].
///
/// Attempt-scoped: never persisted. Retryable failures leave the record in
/// the queue for the next attempt.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RecordError {
    /// Queue record id (upload) or remote entity id (download).
    pub record_id: String,

    pub entity: SyncEntity,

    pub operation: SyncOperation,

    /// Failure description.
    pub message: String,

    /// Whether the next sync attempt will retry this record.
    pub retryable: bool,
}

// =============================================================================
// Sync Result
// =============================================================================

/// Outcome of one `sync_now()` attempt. Immutable value, created fresh per
/// call.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncResult {
    /// True when every attempted record landed. Per-record failures clear
    /// this without aborting the attempt; the failed records stay queued.
    pub success: bool,

    /// Records uploaded-and-acked plus remote rows applied.
    pub synced_records: u64,

    /// Conflicts surfaced for manual resolution during this attempt.
    pub conflicts: Vec<SyncConflict>,

    /// Per-record failures (upload and download).
    pub errors: Vec<RecordError>,

    /// Attempt completion time; becomes the new cursor on success.
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Remote Entity
// =============================================================================

/// Wire shape of a downloaded remote row.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RemoteEntity {
    /// Entity id.
    pub id: String,

    /// Entity kind.
    pub entity: SyncEntity,

    /// Full entity payload as JSON.
    #[ts(type = "unknown")]
    pub data: Value,

    /// Server-side last-modified instant.
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker; a deleted row still propagates through sync.
    #[ts(as = "Option<String>")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Optimistic-concurrency version counter.
    pub version: i64,
}

impl RemoteEntity {
    /// Whether the remote row is soft-deleted.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_round_trip() {
        for entity in SyncEntity::ALL {
            let parsed: SyncEntity = entity.as_str().parse().unwrap();
            assert_eq!(parsed, entity);
        }
        assert!("pallet".parse::<SyncEntity>().is_err());
    }

    #[test]
    fn test_entity_table_names() {
        assert_eq!(SyncEntity::Product.table_name(), "products");
        assert_eq!(SyncEntity::StockAdjustment.table_name(), "stock_adjustments");
    }

    #[test]
    fn test_operation_parsing() {
        assert_eq!("create".parse::<SyncOperation>().unwrap(), SyncOperation::Create);
        assert_eq!("delete".parse::<SyncOperation>().unwrap(), SyncOperation::Delete);
        assert!("upsert".parse::<SyncOperation>().is_err());
    }

    #[test]
    fn test_new_record_is_unsynced() {
        let record = SyncRecord::new(
            SyncEntity::Product,
            SyncOperation::Update,
            json!({"id": "p1", "quantity": 5}),
        );
        assert!(!record.is_synced());
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.entity_id(), Some("p1"));
    }

    #[test]
    fn test_record_entity_id_missing() {
        let record = SyncRecord::new(SyncEntity::Sale, SyncOperation::Create, json!({"total": 100}));
        assert_eq!(record.entity_id(), None);
    }

    #[test]
    fn test_sync_state_default() {
        let state = SyncState::default();
        assert_eq!(state.status, SyncStatus::Idle);
        assert_eq!(state.pending_operations, 0);
        assert!(!state.is_online);
        assert!(state.last_sync_at.is_none());
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("merge".parse::<ConflictResolution>().unwrap(), ConflictResolution::Merge);
        assert!("both".parse::<ConflictResolution>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let entity = serde_json::to_string(&SyncEntity::StockAdjustment).unwrap();
        assert_eq!(entity, "\"stock_adjustment\"");
        let kind = serde_json::to_string(&ConflictKind::ConcurrentEdit).unwrap();
        assert_eq!(kind, "\"concurrent_edit\"");
    }
}
