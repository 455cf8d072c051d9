//! # Conflict Classification
//!
//! Decides whether a downloaded remote row can be applied automatically
//! or must be surfaced as a conflict.
//!
//! ## Classification Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Download Classification                              │
//! │                                                                         │
//! │  local row absent ────────────────────────► Apply (remote wins)         │
//! │                                                                         │
//! │  local.updated_at <= remote.updated_at ───► Apply (remote wins)         │
//! │                                                                         │
//! │  local.updated_at >  remote.updated_at ───► Conflict                    │
//! │        │                                                                │
//! │        ├── remote soft-deleted ──► DeletedModified                      │
//! │        └── otherwise ────────────► ConcurrentEdit                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The rule is deliberately last-write-wins-biased: only a local row that
//! was modified strictly after the remote one raises a conflict. This is
//! not a CRDT or vector-clock design; equal timestamps apply remote.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::DomainError;
use crate::types::{ConflictKind, RemoteEntity};

// =============================================================================
// Classification
// =============================================================================

/// Outcome of classifying one downloaded row against the local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyDecision {
    /// Apply the remote payload to the local store.
    Apply,
    /// Propagate the remote soft delete locally.
    SoftDelete,
    /// Do not touch the local row; surface a conflict of this kind.
    Conflict(ConflictKind),
}

/// Classifies a downloaded remote row against the local copy's timestamp.
///
/// `local_updated_at` is `None` when no local row exists. The comparison is
/// strict: a conflict is reported if and only if the local row was updated
/// strictly after the remote one.
pub fn classify_download(
    local_updated_at: Option<DateTime<Utc>>,
    remote: &RemoteEntity,
) -> ApplyDecision {
    match local_updated_at {
        Some(local) if local > remote.updated_at => {
            if remote.is_deleted() {
                ApplyDecision::Conflict(ConflictKind::DeletedModified)
            } else {
                ApplyDecision::Conflict(ConflictKind::ConcurrentEdit)
            }
        }
        _ if remote.is_deleted() => ApplyDecision::SoftDelete,
        _ => ApplyDecision::Apply,
    }
}

// =============================================================================
// Payload Merge
// =============================================================================

/// Deterministic shallow field merge for the `merge` resolution.
///
/// The remote object is the base; every top-level key present in the local
/// object overwrites it. Nested objects are not merged recursively - the
/// local value replaces the remote one wholesale. Both payloads must be
/// JSON objects.
pub fn merge_payloads(local: &Value, remote: &Value) -> Result<Value, DomainError> {
    let local_map = local
        .as_object()
        .ok_or(DomainError::MergeNotAnObject("local"))?;
    let remote_map = remote
        .as_object()
        .ok_or(DomainError::MergeNotAnObject("remote"))?;

    let mut merged: Map<String, Value> = remote_map.clone();
    for (key, value) in local_map {
        merged.insert(key.clone(), value.clone());
    }

    Ok(Value::Object(merged))
}

// =============================================================================
// Unit Tests
// =============================================================================
