//! # stockline-core: Pure Sync Domain Logic
//!
//! This crate contains the pure domain model for the Stockline sync engine:
//! queue records, sync state, conflicts and the classification rules that
//! decide whether a downloaded remote row can be applied automatically.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Stockline Sync Data Flow                           │
//! │                                                                         │
//! │  UI mutation                                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncRecord (THIS CRATE) ──► sync_queue (stockline-db)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncEngine::sync_now() (stockline-sync)                               │
//! │       │                                                                 │
//! │       ├── upload: FIFO batch ──► remote backend                        │
//! │       └── download: RemoteEntity ──► classify_download (THIS CRATE)    │
//! │                 │                                                       │
//! │                 ├── Apply / SoftDelete ──► local store                 │
//! │                 └── Conflict ──► SyncConflict (THIS CRATE)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`types`] - Queue records, sync state, conflicts, remote rows
//! - [`conflict`] - Deterministic conflict classification and payload merge
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod error;
pub mod types;

// =============================================================================
// Re-exports
// =============================================================================

pub use conflict::{classify_download, merge_payloads, ApplyDecision};
pub use error::DomainError;
pub use types::{
    ConflictKind, ConflictResolution, RecordError, RemoteEntity, SyncConflict, SyncEntity,
    SyncOperation, SyncRecord, SyncResult, SyncState, SyncStatus,
};

/// Meta-table key under which the sync cursor is persisted.
pub const CURSOR_META_KEY: &str = "last_synced_at";
