//! In-memory store for conflicts awaiting manual resolution.
//!
//! Conflicts only exist between detection (during a download phase under the
//! `manual` policy) and resolution, so they live in memory. The local row
//! stays untouched for the whole window, but the cursor advances past the
//! remote row when the cycle finishes, so a restart drops unresolved
//! conflicts until the remote row changes again and is re-downloaded.

use std::sync::Mutex;

use stockline_core::{RemoteEntity, SyncConflict};

/// A surfaced conflict plus the full remote row it was detected against.
/// The remote row is kept so a `remote` or `merge` resolution can apply the
/// server's timestamps and version instead of inventing new ones.
#[derive(Debug, Clone)]
pub struct PendingConflict {
    pub conflict: SyncConflict,
    pub remote: RemoteEntity,
}

#[derive(Default)]
pub struct ConflictStore {
    inner: Mutex<Vec<PendingConflict>>,
}

impl ConflictStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a detected conflict. Re-detecting the same entity on a later
    /// sync replaces the old entry with the fresher remote row rather than
    /// accumulating duplicates.
    pub fn upsert(&self, pending: PendingConflict) {
        let mut inner = self.inner.lock().unwrap();
        inner.retain(|existing| {
            existing.conflict.entity != pending.conflict.entity
                || existing.conflict.entity_id != pending.conflict.entity_id
        });
        inner.push(pending);
    }

    pub fn list(&self) -> Vec<SyncConflict> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.conflict.clone())
            .collect()
    }

    /// Remove and return the conflict with the given id. Resolution is
    /// terminal: once taken, the id is gone.
    pub fn take(&self, conflict_id: &str) -> Option<PendingConflict> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.iter().position(|p| p.conflict.id == conflict_id)?;
        Some(inner.remove(index))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
