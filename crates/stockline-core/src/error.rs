//! # Domain Error Types
//!
//! Pure domain errors. Everything here is produced by parsing or
//! validation; no I/O error ever originates in this crate.

use thiserror::Error;

/// Errors from the pure domain layer.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Unknown entity type string.
    ///
    /// ## When This Occurs
    /// - Corrupt `entity_type` column in the sync queue
    /// - Remote backend returning an entity kind this build doesn't track
    #[error("Unknown sync entity: '{0}'. Valid options: product, category, sale, stock_adjustment")]
    UnknownEntity(String),

    /// Unknown operation string.
    #[error("Unknown sync operation: '{0}'. Valid options: create, update, delete")]
    UnknownOperation(String),

    /// Unknown conflict resolution string.
    #[error("Unknown conflict resolution: '{0}'. Valid options: local, remote, merge")]
    UnknownResolution(String),

    /// Payload merge requires JSON objects on both sides.
    #[error("Cannot merge payloads: {0} side is not a JSON object")]
    MergeNotAnObject(&'static str),
}
