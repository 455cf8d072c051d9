//! Table-store sync backend.
//!
//! Speaks to a managed table store that exposes one REST table per entity
//! (PostgREST conventions, as hosted by e.g. Supabase):
//!
//! ```text
//! POST {base}/rest/v1/{table}?on_conflict=id   — upsert one row
//! GET  {base}/rest/v1/{table}?updated_at=gt..  — incremental download
//! GET  {base}/rest/v1/                         — reachability probe
//! ```
//!
//! Unlike the REST backend there is no batch endpoint, so uploads are pushed
//! row by row in queue order and each row gets its own outcome. A failed row
//! never blocks the rows behind it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use stockline_core::{RemoteEntity, SyncEntity, SyncOperation, SyncRecord};

use crate::backend::{SyncBackend, UploadOutcome};
use crate::error::{EngineResult, SyncError};
use crate::protocol::RecordFailure;

/// Row shape shared by all entity tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableRow {
    id: String,
    data: Value,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
    #[serde(default = "default_version")]
    version: i64,
}

fn default_version() -> i64 {
    1
}

pub struct TableBackend {
    client: Client,
    base_url: String,
}

impl TableBackend {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> EngineResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| SyncError::InvalidConfig("api_key contains invalid bytes".into()))?;
            headers.insert("apikey", value);
            let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| SyncError::InvalidConfig("api_key contains invalid bytes".into()))?;
            headers.insert(AUTHORIZATION, bearer);
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { client, base_url })
    }

    fn table_url(&self, entity: SyncEntity) -> String {
        format!("{}/rest/v1/{}", self.base_url, entity.table_name())
    }

    /// Upsert one queue record into its entity table. Deletes are soft: the
    /// row is upserted with `deleted_at` set so other devices can observe
    /// the tombstone.
    async fn push_record(&self, record: &SyncRecord, entity_id: &str) -> EngineResult<()> {
        let deleted_at = match record.operation {
            SyncOperation::Delete => Some(record.created_at),
            _ => None,
        };
        let row = TableRow {
            id: entity_id.to_string(),
            data: record.payload.clone(),
            updated_at: record.created_at,
            deleted_at,
            version: default_version(),
        };

        let response = self
            .client
            .post(self.table_url(record.entity))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates")
            .json(&row)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::BackendRejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

fn failure_from(record_id: &str, err: &SyncError) -> RecordFailure {
    RecordFailure {
        id: record_id.to_string(),
        error: err.to_string(),
        retryable: err.is_retryable(),
    }
}

#[async_trait]
impl SyncBackend for TableBackend {
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upload_batch(
        &self,
        records: &[SyncRecord],
        _cursor: Option<DateTime<Utc>>,
        _device_id: &str,
    ) -> EngineResult<UploadOutcome> {
        let mut outcome = UploadOutcome::default();

        for record in records {
            let Some(entity_id) = record.entity_id().map(str::to_string) else {
                outcome.failures.push(RecordFailure {
                    id: record.id.clone(),
                    error: "payload has no 'id' field".to_string(),
                    retryable: false,
                });
                continue;
            };

            match self.push_record(record, &entity_id).await {
                Ok(()) => outcome.acked_ids.push(record.id.clone()),
                Err(err) => {
                    warn!(record_id = %record.id, error = %err, "row upsert failed");
                    outcome.failures.push(failure_from(&record.id, &err));
                }
            }
        }

        debug!(
            acked = outcome.acked_ids.len(),
            failed = outcome.failures.len(),
            "table upload complete"
        );
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn download_since(
        &self,
        cursor: Option<DateTime<Utc>>,
        _device_id: &str,
    ) -> EngineResult<Vec<RemoteEntity>> {
        let mut entities = Vec::new();

        for entity in SyncEntity::ALL {
            let mut request = self
                .client
                .get(self.table_url(entity))
                .query(&[("select", "*"), ("order", "updated_at.asc")]);
            if let Some(cursor) = cursor {
                let stamp = cursor.to_rfc3339_opts(SecondsFormat::Micros, true);
                request = request.query(&[("updated_at", format!("gt.{stamp}"))]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(SyncError::BackendRejected {
                    status: status.as_u16(),
                    message,
                });
            }

            let rows: Vec<TableRow> = response.json().await?;
            entities.extend(rows.into_iter().map(|row| RemoteEntity {
                id: row.id,
                entity,
                data: row.data,
                updated_at: row.updated_at,
                deleted_at: row.deleted_at,
                version: row.version,
            }));
        }

        debug!(entities = entities.len(), "table download complete");
        Ok(entities)
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/rest/v1/", self.base_url);
        match self.client.get(&url).send().await {
            // PostgREST answers the root with 200; some gateways return 404
            // for it while the tables still work, so only 5xx and transport
            // failures count as unhealthy.
            Ok(response) => !response.status().is_server_error(),
            Err(_) => false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
