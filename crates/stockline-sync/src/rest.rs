//! REST sync backend.
//!
//! Talks to the dedicated Stockline sync API:
//!
//! ```text
//! POST {base}/sync/upload    — push queued mutations, returns acked/failed ids
//! POST {base}/sync/download  — pull rows changed since the cursor
//! GET  {base}/health         — reachability probe
//! ```
//!
//! Every response body is an `ApiEnvelope`. Authentication is a bearer token
//! when an API key is configured.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use stockline_core::{RemoteEntity, SyncRecord};

use crate::backend::{SyncBackend, UploadOutcome};
use crate::error::{EngineResult, SyncError};
use crate::protocol::{
    ApiEnvelope, DownloadRequest, DownloadResponse, PushOperation, UploadRequest, UploadResponse,
};

pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestBackend {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Send a request and unwrap the envelope. Non-2xx statuses never have a
    /// useful envelope, so they map straight to `BackendRejected`.
    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> EngineResult<T> {
        let response = self.authorize(builder).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::BackendRejected {
                status: status.as_u16(),
                message,
            });
        }
        let envelope: ApiEnvelope<T> = response.json().await?;
        envelope.into_data()
    }
}

#[async_trait]
impl SyncBackend for RestBackend {
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upload_batch(
        &self,
        records: &[SyncRecord],
        cursor: Option<DateTime<Utc>>,
        device_id: &str,
    ) -> EngineResult<UploadOutcome> {
        let request = UploadRequest {
            device_id: device_id.to_string(),
            last_sync_at: cursor,
            operations: records.iter().map(PushOperation::from).collect(),
        };

        let url = format!("{}/sync/upload", self.base_url);
        let response: UploadResponse = self.execute(self.client.post(&url).json(&request)).await?;

        debug!(
            acked = response.acked_ids.len(),
            failed = response.failed.len(),
            "upload batch complete"
        );
        Ok(UploadOutcome {
            acked_ids: response.acked_ids,
            failures: response.failed,
        })
    }

    #[instrument(skip(self))]
    async fn download_since(
        &self,
        cursor: Option<DateTime<Utc>>,
        device_id: &str,
    ) -> EngineResult<Vec<RemoteEntity>> {
        let request = DownloadRequest {
            device_id: device_id.to_string(),
            last_sync_at: cursor,
        };

        let url = format!("{}/sync/download", self.base_url);
        let response: DownloadResponse =
            self.execute(self.client.post(&url).json(&request)).await?;

        debug!(entities = response.entities.len(), "download complete");
        Ok(response.entities)
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.authorize(self.client.get(&url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stockline_core::{SyncEntity, SyncOperation};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer, api_key: Option<&str>) -> RestBackend {
        RestBackend::new(
            server.uri(),
            api_key.map(|k| k.to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn upload_parses_acks_and_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync/upload"))
            .and(body_partial_json(json!({ "device_id": "dev-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "acked_ids": ["r1"],
                    "failed": [{ "id": "r2", "error": "validation", "retryable": false }]
                },
                "error": null,
                "timestamp": "2024-05-01T12:00:00Z"
            })))
            .mount(&server)
            .await;

        let records = vec![SyncRecord::new(
            SyncEntity::Product,
            SyncOperation::Create,
            json!({ "id": "p1" }),
        )];
        let outcome = backend(&server, None)
            .upload_batch(&records, None, "dev-1")
            .await
            .unwrap();

        assert_eq!(outcome.acked_ids, vec!["r1"]);
        assert_eq!(outcome.failures.len(), 1);
        assert!(!outcome.failures[0].retryable);
    }

    #[tokio::test]
    async fn upload_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync/upload"))
            .and(header("authorization", "Bearer sk_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "acked_ids": [], "failed": [] },
                "error": null,
                "timestamp": "2024-05-01T12:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server, Some("sk_test"))
            .upload_batch(&[], None, "dev-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_envelope_becomes_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync/download"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "data": null,
                "error": "maintenance window",
                "timestamp": "2024-05-01T12:00:00Z"
            })))
            .mount(&server)
            .await;

        let err = backend(&server, None)
            .download_since(None, "dev-1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Backend(msg) if msg == "maintenance window"));
    }

    #[tokio::test]
    async fn http_error_maps_to_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync/upload"))
            .respond_with(ResponseTemplate::new(401).set_body_string("missing token"))
            .mount(&server)
            .await;

        let err = backend(&server, None)
            .upload_batch(&[], None, "dev-1")
            .await
            .unwrap_err();
        match err {
            SyncError::BackendRejected { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "missing token");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_check_reports_reachability() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(backend(&server, None).check_health().await);

        let dead = RestBackend::new(
            "http://127.0.0.1:1".to_string(),
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(!dead.check_health().await);
    }
}
