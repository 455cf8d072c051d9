//! # Sync Queue Repository
//!
//! Manages the sync queue for offline-first synchronization.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL MUTATION (e.g., adjust stock)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT INTO sync_queue (entity_type, operation, payload, ...)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              SYNC ENGINE (stockline-sync)                       │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT * FROM sync_queue WHERE synced_at IS NULL           │   │
//! │  │     ORDER BY created_at ASC LIMIT <batch_size>                 │   │
//! │  │                                                                 │   │
//! │  │  2. Upload batch in FIFO order                                 │   │
//! │  │     On ack:     UPDATE sync_queue SET synced_at = NOW()        │   │
//! │  │     On failure: UPDATE sync_queue SET retry_count += 1,        │   │
//! │  │                 last_error = ?, attempted_at = NOW()            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • Mutations are never lost (persisted before any network I/O)         │
//! │  • Offline? Entries queue up; back online, the engine drains them      │
//! │  • FIFO by created_at: later mutations on the same entity apply after  │
//! │    earlier ones                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use stockline_core::{SyncEntity, SyncOperation, SyncRecord};

// =============================================================================
// Row Mapping
// =============================================================================

/// Raw sync_queue row. Converted to [`SyncRecord`] after decode.
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: String,
    entity_type: String,
    operation: String,
    payload: String,
    retry_count: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    attempted_at: Option<DateTime<Utc>>,
    synced_at: Option<DateTime<Utc>>,
}

impl QueueRow {
    fn into_record(self) -> DbResult<SyncRecord> {
        Ok(SyncRecord {
            entity: self.entity_type.parse::<SyncEntity>().map_err(|e| {
                crate::error::DbError::CorruptRow(e.to_string())
            })?,
            operation: self.operation.parse::<SyncOperation>().map_err(|e| {
                crate::error::DbError::CorruptRow(e.to_string())
            })?,
            payload: serde_json::from_str(&self.payload)?,
            id: self.id,
            retry_count: self.retry_count,
            last_error: self.last_error,
            created_at: self.created_at,
            attempted_at: self.attempted_at,
            synced_at: self.synced_at,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for sync queue operations.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

impl SyncQueueRepository {
    /// Creates a new SyncQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueueRepository { pool }
    }

    /// Persists a queued mutation.
    ///
    /// The record should come from [`SyncRecord::new`] so ids and
    /// timestamps are assigned uniformly.
    pub async fn enqueue(&self, record: &SyncRecord) -> DbResult<()> {
        debug!(
            id = %record.id,
            entity = %record.entity,
            operation = %record.operation,
            "Enqueuing sync record"
        );

        let payload = serde_json::to_string(&record.payload)?;

        sqlx::query(
            r#"
            INSERT INTO sync_queue (
                id, entity_type, operation, payload,
                retry_count, last_error, created_at, attempted_at, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&record.id)
        .bind(record.entity.as_str())
        .bind(record.operation.as_str())
        .bind(payload)
        .bind(record.retry_count)
        .bind(&record.last_error)
        .bind(record.created_at)
        .bind(record.attempted_at)
        .bind(record.synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets pending records that need to be synced.
    ///
    /// Returns rows where `synced_at IS NULL` with fewer than `max_retries`
    /// failed attempts, ordered by `created_at` ascending (oldest first),
    /// ties broken by insertion order. The ordering is a correctness
    /// requirement: later mutations on the same entity must upload after
    /// earlier ones. Rows past their retry budget are excluded here so they
    /// cannot occupy the batch window and starve newer records.
    pub async fn get_pending(&self, limit: u32, max_retries: i64) -> DbResult<Vec<SyncRecord>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, operation, payload,
                   retry_count, last_error, created_at, attempted_at, synced_at
            FROM sync_queue
            WHERE synced_at IS NULL AND retry_count < ?2
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueRow::into_record).collect()
    }

    /// Fetches one record by id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<SyncRecord>> {
        let row: Option<QueueRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, operation, payload,
                   retry_count, last_error, created_at, attempted_at, synced_at
            FROM sync_queue
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(QueueRow::into_record).transpose()
    }

    /// Marks a record as successfully synced.
    ///
    /// Idempotent: the `WHERE synced_at IS NULL` guard makes a second call
    /// a no-op, so `synced_at` transitions exactly once.
    pub async fn mark_synced(&self, id: &str) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE sync_queue SET
                synced_at = ?2,
                attempted_at = ?2,
                last_error = NULL
            WHERE id = ?1 AND synced_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a sync failure.
    ///
    /// Increments `retry_count` and stores the error for the next attempt's
    /// backoff decision. Never touches already-synced rows.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE sync_queue SET
                retry_count = retry_count + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1 AND synced_at IS NULL
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts pending sync records.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE synced_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Deletes old synced records (retention pass).
    ///
    /// Pending rows are never touched. Decoupled from the sync-attempt
    /// path; invoked by `SyncEngine::run_maintenance`.
    ///
    /// ## Returns
    /// Number of deleted records.
    pub async fn cleanup_synced(&self, older_than_days: u32) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_queue
            WHERE synced_at IS NOT NULL
            AND synced_at < datetime('now', '-' || ?1 || ' days')
            "#,
        )
        .bind(older_than_days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
