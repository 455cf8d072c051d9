//! Wire types shared by the REST backend.
//!
//! The sync API wraps every response in a standard envelope:
//!
//! ```json
//! { "success": true, "data": { ... }, "error": null, "timestamp": "..." }
//! ```
//!
//! Upload requests carry queued operations; download requests carry the
//! device's cursor so the server only returns rows changed since then.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use stockline_core::{RemoteEntity, SyncEntity, SyncOperation, SyncRecord};

use crate::error::{EngineResult, SyncError};

// =============================================================================
// Requests
// =============================================================================

/// A single queued mutation as sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushOperation {
    pub id: String,
    pub entity: SyncEntity,
    pub operation: SyncOperation,
    pub data: Value,
    /// When the mutation happened on the device, not when it was uploaded.
    pub timestamp: DateTime<Utc>,
}

impl From<&SyncRecord> for PushOperation {
    fn from(record: &SyncRecord) -> Self {
        Self {
            id: record.id.clone(),
            entity: record.entity,
            operation: record.operation,
            data: record.payload.clone(),
            timestamp: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub device_id: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub operations: Vec<PushOperation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub device_id: String,
    pub last_sync_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    // No `serde(default)` here: that would bound the generated impl on
    // `T: Default`. A missing `Option` field already deserializes as `None`.
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the envelope, turning `success: false` into a backend error.
    pub fn into_data(self) -> EngineResult<T> {
        if !self.success {
            return Err(SyncError::Backend(
                self.error.unwrap_or_else(|| "unspecified error".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| SyncError::Backend("envelope missing data".to_string()))
    }
}

/// Per-record failure reported by the server inside an otherwise
/// successful upload response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFailure {
    pub id: String,
    pub error: String,
    #[serde(default = "default_retryable")]
    pub retryable: bool,
}

fn default_retryable() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub acked_ids: Vec<String>,
    #[serde(default)]
    pub failed: Vec<RecordFailure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadResponse {
    #[serde(default)]
    pub entities: Vec<RemoteEntity>,
}

// =============================================================================
// Tests
// =============================================================================
