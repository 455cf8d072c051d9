//! # Meta Repository
//!
//! Key/value store for scalar engine state. The only key in use today is
//! the sync cursor (`last_synced_at`); the table exists so future engine
//! state never needs a migration.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use stockline_core::CURSOR_META_KEY;

/// Repository for the `meta` key/value table.
#[derive(Debug, Clone)]
pub struct MetaRepository {
    pool: SqlitePool,
}

impl MetaRepository {
    /// Creates a new MetaRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MetaRepository { pool }
    }

    /// Reads a raw value.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM meta WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    /// Writes a raw value (upsert).
    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO meta (key, value) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Loads the sync cursor.
    ///
    /// `None` means no sync has ever succeeded; the engine treats that as
    /// epoch for the download filter.
    pub async fn load_cursor(&self) -> DbResult<Option<DateTime<Utc>>> {
        let raw = self.get(CURSOR_META_KEY).await?;

        match raw {
            None => Ok(None),
            Some(s) => {
                let parsed = DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| DbError::CorruptRow(format!("cursor '{}': {}", s, e)))?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
        }
    }

    /// Persists the sync cursor.
    ///
    /// Stored as RFC 3339 so the value stays readable in external tooling.
    pub async fn save_cursor(&self, cursor: DateTime<Utc>) -> DbResult<()> {
        debug!(cursor = %cursor, "Persisting sync cursor");
        self.set(CURSOR_META_KEY, &cursor.to_rfc3339()).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
