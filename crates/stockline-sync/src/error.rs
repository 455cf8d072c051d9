//! Error types for the sync engine.
//!
//! `SyncError` covers every failure surface the engine touches: configuration,
//! the HTTP transport, backend responses, the local store, and the engine's
//! own orchestration rules (`SyncInProgress`, conflict resolution).

use thiserror::Error;

/// Result alias used throughout the sync crate.
pub type EngineResult<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    // =========================================================================
    // Configuration
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport and backend
    // =========================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend rejected request with status {status}: {message}")]
    BackendRejected { status: u16, message: String },

    /// The backend returned a well-formed envelope with `success: false`.
    #[error("Backend error: {0}")]
    Backend(String),

    // =========================================================================
    // Local store and data
    // =========================================================================
    #[error(transparent)]
    Database(#[from] stockline_db::DbError),

    #[error(transparent)]
    Domain(#[from] stockline_core::DomainError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Orchestration
    // =========================================================================
    /// A sync cycle is already running. Callers that trigger syncs
    /// opportunistically (scheduler, enqueue hooks) treat this as benign.
    #[error("A sync cycle is already in progress")]
    SyncInProgress,

    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    #[error("Resolution '{resolution}' is not valid for conflict {id}: {reason}")]
    InvalidResolution {
        id: String,
        resolution: String,
        reason: String,
    },

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl SyncError {
    /// Whether a failed record should stay in the queue for another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SyncError::BackendRejected { status, .. } => {
                // Server errors and throttling are transient. Client errors
                // (bad payloads, auth) will not improve on retry.
                *status >= 500 || *status == 408 || *status == 429
            }
            SyncError::Backend(_) => true,
            SyncError::Database(_) => true,
            _ => false,
        }
    }
}
