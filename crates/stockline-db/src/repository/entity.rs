//! # Entity Mirror Repository
//!
//! Reads and writes the per-entity mirror tables (`products`, `categories`,
//! `sales`, `stock_adjustments`). Each table has the same shape:
//!
//! ```text
//! id | data (JSON) | updated_at | deleted_at | version
//! ```
//!
//! The sync engine uses this repository for the download path (applying
//! remote rows) and for conflict resolution (overwriting or merging local
//! rows). The rest of the application reads and writes these tables through
//! its own layers; the store is shared, so every write here runs inside a
//! single transaction.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use stockline_core::{RemoteEntity, SyncEntity};

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct EntityRow {
    id: String,
    data: String,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    version: i64,
}

/// A decoded local mirror row.
#[derive(Debug, Clone)]
pub struct LocalEntityRow {
    pub id: String,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl EntityRow {
    fn into_local(self) -> DbResult<LocalEntityRow> {
        Ok(LocalEntityRow {
            data: serde_json::from_str(&self.data)?,
            id: self.id,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            version: self.version,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the entity mirror tables.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    pool: SqlitePool,
}

impl EntityRepository {
    /// Creates a new EntityRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EntityRepository { pool }
    }

    /// Fetches a local row by id.
    pub async fn get(&self, entity: SyncEntity, id: &str) -> DbResult<Option<LocalEntityRow>> {
        // Table names come from a const lookup, never from input.
        let sql = format!(
            "SELECT id, data, updated_at, deleted_at, version FROM {} WHERE id = ?1",
            entity.table_name()
        );

        let row: Option<EntityRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(EntityRow::into_local).transpose()
    }

    /// Fetches only the local `updated_at` for conflict classification.
    pub async fn get_updated_at(
        &self,
        entity: SyncEntity,
        id: &str,
    ) -> DbResult<Option<DateTime<Utc>>> {
        let sql = format!(
            "SELECT updated_at FROM {} WHERE id = ?1",
            entity.table_name()
        );

        let updated_at: Option<DateTime<Utc>> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(updated_at)
    }

    /// Applies a downloaded remote row, soft deletes included.
    ///
    /// Runs in one transaction so concurrent application reads never see a
    /// half-applied row.
    pub async fn apply_remote(&self, remote: &RemoteEntity) -> DbResult<()> {
        debug!(
            entity = %remote.entity,
            id = %remote.id,
            version = remote.version,
            deleted = remote.is_deleted(),
            "Applying remote entity"
        );

        let sql = format!(
            r#"
            INSERT INTO {} (id, data, updated_at, deleted_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at,
                version = excluded.version
            "#,
            remote.entity.table_name()
        );

        let data = serde_json::to_string(&remote.data)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql)
            .bind(&remote.id)
            .bind(data)
            .bind(remote.updated_at)
            .bind(remote.deleted_at)
            .bind(remote.version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Upserts a locally-authored payload (conflict resolution writes).
    ///
    /// Bumps the version counter on an existing row and clears any
    /// soft-delete marker: a resolved entity is live again.
    pub async fn upsert_local(
        &self,
        entity: SyncEntity,
        id: &str,
        data: &Value,
        updated_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, data, updated_at, deleted_at, version)
            VALUES (?1, ?2, ?3, NULL, 1)
            ON CONFLICT (id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                deleted_at = NULL,
                version = version + 1
            "#,
            entity.table_name()
        );

        let payload = serde_json::to_string(data)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql)
            .bind(id)
            .bind(payload)
            .bind(updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn remote(id: &str, deleted: bool) -> RemoteEntity {
        let updated_at = Utc::now();
        RemoteEntity {
            id: id.to_string(),
            entity: SyncEntity::Product,
            data: json!({"id": id, "name": "Widget", "quantity": 3}),
            updated_at,
            deleted_at: deleted.then_some(updated_at),
            version: 2,
        }
    }

    #[tokio::test]
    async fn test_apply_remote_inserts_row() {
        let db = test_db().await;
        let repo = db.entities();

        repo.apply_remote(&remote("p1", false)).await.unwrap();

        let row = repo.get(SyncEntity::Product, "p1").await.unwrap().unwrap();
        assert_eq!(row.data["name"], "Widget");
        assert_eq!(row.version, 2);
        assert!(row.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_apply_remote_overwrites_existing() {
        let db = test_db().await;
        let repo = db.entities();

        repo.apply_remote(&remote("p1", false)).await.unwrap();

        let mut newer = remote("p1", false);
        newer.data = json!({"id": "p1", "name": "Widget v2", "quantity": 9});
        newer.version = 3;
        repo.apply_remote(&newer).await.unwrap();

        let row = repo.get(SyncEntity::Product, "p1").await.unwrap().unwrap();
        assert_eq!(row.data["name"], "Widget v2");
        assert_eq!(row.version, 3);
    }

    #[tokio::test]
    async fn test_apply_remote_soft_delete() {
        let db = test_db().await;
        let repo = db.entities();

        repo.apply_remote(&remote("p1", false)).await.unwrap();
        repo.apply_remote(&remote("p1", true)).await.unwrap();

        let row = repo.get(SyncEntity::Product, "p1").await.unwrap().unwrap();
        assert!(row.deleted_at.is_some());
    }

    #[tokio::test]
    async fn test_get_updated_at_missing_row() {
        let db = test_db().await;
        let got = db
            .entities()
            .get_updated_at(SyncEntity::Sale, "nope")
            .await
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_upsert_local_bumps_version_and_revives() {
        let db = test_db().await;
        let repo = db.entities();

        repo.apply_remote(&remote("p1", true)).await.unwrap();

        let merged = json!({"id": "p1", "name": "Widget (kept)", "quantity": 7});
        repo.upsert_local(SyncEntity::Product, "p1", &merged, Utc::now())
            .await
            .unwrap();

        let row = repo.get(SyncEntity::Product, "p1").await.unwrap().unwrap();
        assert_eq!(row.data["name"], "Widget (kept)");
        assert_eq!(row.version, 3);
        assert!(row.deleted_at.is_none());
    }
}
