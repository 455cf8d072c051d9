//! End-to-end engine tests against a mock sync API.
//!
//! Each test wires a real in-memory database to the REST backend pointed at
//! a wiremock server, then drives the engine through full cycles.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use stockline_core::{
    ConflictKind, ConflictResolution, SyncEntity, SyncOperation, SyncStatus,
};
use stockline_db::{Database, DbConfig};
use stockline_sync::{ConflictPolicy, SyncConfig, SyncEngine, SyncError};

// =============================================================================
// Harness
// =============================================================================

async fn engine_against(server: &MockServer, policy: ConflictPolicy) -> SyncEngine {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let mut config = SyncConfig::default();
    config.backend.api_base_url = server.uri();
    config.sync.sync_interval_secs = 0; // no scheduler in tests
    config.sync.request_timeout_secs = 5;
    config.sync.conflict_policy = policy;
    SyncEngine::new(config, db).unwrap()
}

/// Acks every uploaded operation.
struct AckAll;

impl Respond for AckAll {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let acked: Vec<Value> = body["operations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|op| op["id"].clone())
            .collect();
        envelope(json!({ "acked_ids": acked, "failed": [] }))
    }
}

/// Acks everything except operations whose payload id matches, which fail.
struct FailEntity(&'static str);

impl Respond for FailEntity {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let mut acked = Vec::new();
        let mut failed = Vec::new();
        for op in body["operations"].as_array().unwrap() {
            if op["data"]["id"] == self.0 {
                failed.push(json!({
                    "id": op["id"],
                    "error": "price must be positive",
                    "retryable": true
                }));
            } else {
                acked.push(op["id"].clone());
            }
        }
        envelope(json!({ "acked_ids": acked, "failed": failed }))
    }
}

/// Returns the given entities on the first download (null cursor) and
/// nothing on later downloads, like a server that has gone quiet.
struct EntitiesOnFirstSync(Vec<Value>);

impl Respond for EntitiesOnFirstSync {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let entities = if body["last_sync_at"].is_null() {
            Value::Array(self.0.clone())
        } else {
            json!([])
        };
        envelope(json!({ "entities": entities }))
    }
}

fn envelope(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "data": data,
        "error": null,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

fn empty_download() -> ResponseTemplate {
    envelope(json!({ "entities": [] }))
}

async fn mount_upload(server: &MockServer, responder: impl Respond + 'static) {
    Mock::given(method("POST"))
        .and(path("/sync/upload"))
        .respond_with(responder)
        .mount(server)
        .await;
}

async fn mount_download(server: &MockServer, responder: impl Respond + 'static) {
    Mock::given(method("POST"))
        .and(path("/sync/download"))
        .respond_with(responder)
        .mount(server)
        .await;
}

fn remote_product(id: &str, data: Value, updated_at: DateTime<Utc>) -> Value {
    json!({
        "id": id,
        "entity": "product",
        "data": data,
        "updated_at": updated_at.to_rfc3339(),
        "deleted_at": null,
        "version": 2
    })
}

async fn queue_product(engine: &SyncEngine, id: &str, name: &str) {
    engine
        .queue_operation(
            SyncEntity::Product,
            SyncOperation::Create,
            json!({ "id": id, "name": name, "price": 100 }),
        )
        .await
        .unwrap();
}

// =============================================================================
// Upload, cursor, state
// =============================================================================

#[tokio::test]
async fn full_cycle_drains_queue_and_advances_cursor() {
    let server = MockServer::start().await;
    mount_upload(&server, AckAll).await;
    mount_download(&server, empty_download()).await;

    let engine = engine_against(&server, ConflictPolicy::Manual).await;
    queue_product(&engine, "p1", "Beans").await;
    queue_product(&engine, "p2", "Rice").await;
    queue_product(&engine, "p3", "Salt").await;
    assert_eq!(engine.state().pending_operations, 3);

    let result = engine.sync_now().await.unwrap();
    assert!(result.success);
    assert_eq!(result.synced_records, 3);
    assert!(result.errors.is_empty());
    assert!(result.conflicts.is_empty());

    let state = engine.state();
    assert_eq!(state.status, SyncStatus::Success);
    assert_eq!(state.pending_operations, 0);
    assert_eq!(state.last_sync_at, Some(result.timestamp));
    assert!(state.is_online);

    // Second cycle sends the first cycle's timestamp as its cursor.
    engine.sync_now().await.unwrap();
    let requests = server.received_requests().await.unwrap();
    let downloads: Vec<Value> = requests
        .iter()
        .filter(|r| r.url.path() == "/sync/download")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(downloads.len(), 2);
    assert!(downloads[0]["last_sync_at"].is_null());
    let sent: DateTime<Utc> = downloads[1]["last_sync_at"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(sent, result.timestamp);
}

#[tokio::test]
async fn upload_preserves_queue_order() {
    let server = MockServer::start().await;
    mount_upload(&server, AckAll).await;
    mount_download(&server, empty_download()).await;

    let engine = engine_against(&server, ConflictPolicy::Manual).await;
    for i in 0..5 {
        queue_product(&engine, &format!("p{i}"), "Item").await;
    }
    engine.sync_now().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let upload = requests
        .iter()
        .find(|r| r.url.path() == "/sync/upload")
        .unwrap();
    let body: Value = serde_json::from_slice(&upload.body).unwrap();
    let ids: Vec<&str> = body["operations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|op| op["data"]["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["p0", "p1", "p2", "p3", "p4"]);
}

#[tokio::test]
async fn partial_batch_failure_keeps_failed_record_queued() {
    let server = MockServer::start().await;
    mount_upload(&server, FailEntity("p2")).await;
    mount_download(&server, empty_download()).await;

    let engine = engine_against(&server, ConflictPolicy::Manual).await;
    queue_product(&engine, "p1", "Beans").await;
    queue_product(&engine, "p2", "Rice").await;
    queue_product(&engine, "p3", "Salt").await;

    let result = engine.sync_now().await.unwrap();
    assert!(!result.success);
    assert_eq!(result.synced_records, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].message, "price must be positive");
    assert!(result.errors[0].retryable);
    assert_eq!(engine.state().pending_operations, 1);
    // The cycle itself still completes.
    assert_eq!(engine.state().status, SyncStatus::Success);
}

#[tokio::test]
async fn concurrent_sync_is_rejected_not_queued() {
    let server = MockServer::start().await;
    mount_upload(&server, AckAll).await;
    mount_download(
        &server,
        empty_download().set_delay(Duration::from_millis(300)),
    )
    .await;

    let engine = engine_against(&server, ConflictPolicy::Manual).await;
    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sync_now().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The second caller is told immediately; it does not wait in line.
    match engine.sync_now().await {
        Err(SyncError::SyncInProgress) => {}
        other => panic!("expected SyncInProgress, got {other:?}"),
    }

    first.await.unwrap().unwrap();
    // Guard released: a fresh cycle is allowed again.
    engine.sync_now().await.unwrap();
}

#[tokio::test]
async fn transport_failure_marks_engine_offline() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let mut config = SyncConfig::default();
    config.backend.api_base_url = "http://127.0.0.1:9".to_string(); // nothing listens here
    config.sync.sync_interval_secs = 0;
    config.sync.request_timeout_secs = 1;
    let engine = SyncEngine::new(config, db).unwrap();

    queue_product(&engine, "p1", "Beans").await;
    assert!(engine.sync_now().await.is_err());

    let state = engine.state();
    assert_eq!(state.status, SyncStatus::Offline);
    assert!(!state.is_online);
    assert!(state.error_message.is_some());
    // Nothing was lost.
    assert_eq!(state.pending_operations, 1);
}

#[tokio::test]
async fn subscribers_see_syncing_then_success() {
    let server = MockServer::start().await;
    mount_upload(&server, AckAll).await;
    mount_download(&server, empty_download()).await;

    let engine = engine_against(&server, ConflictPolicy::Manual).await;
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&statuses);
    let sub = engine.subscribe(move |state| {
        seen.lock().unwrap().push(state.status);
    });

    engine.sync_now().await.unwrap();
    let seen = statuses.lock().unwrap().clone();
    assert!(seen.contains(&SyncStatus::Syncing));
    assert_eq!(*seen.last().unwrap(), SyncStatus::Success);
    sub.cancel();
}

// =============================================================================
// Download and conflicts
// =============================================================================

#[tokio::test]
async fn download_applies_rows_and_tombstones() {
    let server = MockServer::start().await;
    mount_upload(&server, AckAll).await;
    let newer = Utc::now() + ChronoDuration::hours(1);
    mount_download(
        &server,
        EntitiesOnFirstSync(vec![
            remote_product("p1", json!({ "id": "p1", "name": "Beans" }), newer),
            json!({
                "id": "p2",
                "entity": "product",
                "data": { "id": "p2" },
                "updated_at": newer.to_rfc3339(),
                "deleted_at": newer.to_rfc3339(),
                "version": 3
            }),
        ]),
    )
    .await;

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let mut config = SyncConfig::default();
    config.backend.api_base_url = server.uri();
    config.sync.sync_interval_secs = 0;
    let engine = SyncEngine::new(config, db.clone()).unwrap();

    let result = engine.sync_now().await.unwrap();
    assert_eq!(result.synced_records, 2);
    assert!(result.conflicts.is_empty());

    let row = db.entities().get(SyncEntity::Product, "p1").await.unwrap().unwrap();
    assert_eq!(row.data["name"], "Beans");
    assert!(row.deleted_at.is_none());

    let tombstone = db.entities().get(SyncEntity::Product, "p2").await.unwrap().unwrap();
    assert!(tombstone.deleted_at.is_some());
}

#[tokio::test]
async fn manual_policy_surfaces_conflict_and_leaves_local_untouched() {
    let server = MockServer::start().await;
    mount_upload(&server, AckAll).await;

    let local_time = Utc::now();
    let remote_time = local_time - ChronoDuration::hours(1);
    mount_download(
        &server,
        EntitiesOnFirstSync(vec![remote_product(
            "p1",
            json!({ "id": "p1", "name": "remote" }),
            remote_time,
        )]),
    )
    .await;

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.entities()
        .upsert_local(
            SyncEntity::Product,
            "p1",
            &json!({ "id": "p1", "name": "local" }),
            local_time,
        )
        .await
        .unwrap();

    let mut config = SyncConfig::default();
    config.backend.api_base_url = server.uri();
    config.sync.sync_interval_secs = 0;
    let engine = SyncEngine::new(config, db.clone()).unwrap();

    let result = engine.sync_now().await.unwrap();
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].kind, ConflictKind::ConcurrentEdit);
    assert_eq!(result.synced_records, 0);

    // Local row untouched while the conflict is pending.
    let row = db.entities().get(SyncEntity::Product, "p1").await.unwrap().unwrap();
    assert_eq!(row.data["name"], "local");

    // Resolution is terminal.
    let conflict_id = result.conflicts[0].id.clone();
    engine
        .resolve_conflict(&conflict_id, ConflictResolution::Remote)
        .await
        .unwrap();
    let row = db.entities().get(SyncEntity::Product, "p1").await.unwrap().unwrap();
    assert_eq!(row.data["name"], "remote");

    assert!(engine.pending_conflicts().is_empty());
    match engine
        .resolve_conflict(&conflict_id, ConflictResolution::Remote)
        .await
    {
        Err(SyncError::ConflictNotFound(_)) => {}
        other => panic!("expected ConflictNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn remote_wins_policy_applies_automatically() {
    let server = MockServer::start().await;
    mount_upload(&server, AckAll).await;

    let local_time = Utc::now();
    mount_download(
        &server,
        EntitiesOnFirstSync(vec![remote_product(
            "p1",
            json!({ "id": "p1", "name": "remote" }),
            local_time - ChronoDuration::hours(1),
        )]),
    )
    .await;

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.entities()
        .upsert_local(
            SyncEntity::Product,
            "p1",
            &json!({ "id": "p1", "name": "local" }),
            local_time,
        )
        .await
        .unwrap();

    let mut config = SyncConfig::default();
    config.backend.api_base_url = server.uri();
    config.sync.sync_interval_secs = 0;
    config.sync.conflict_policy = ConflictPolicy::RemoteWins;
    let engine = SyncEngine::new(config, db.clone()).unwrap();

    let result = engine.sync_now().await.unwrap();
    assert!(result.conflicts.is_empty());
    assert!(engine.pending_conflicts().is_empty());

    let row = db.entities().get(SyncEntity::Product, "p1").await.unwrap().unwrap();
    assert_eq!(row.data["name"], "remote");
}

#[tokio::test]
async fn local_wins_policy_requeues_local_row() {
    let server = MockServer::start().await;
    // No upload mock: queue starts empty so the upload phase is skipped.
    let local_time = Utc::now();
    mount_download(
        &server,
        EntitiesOnFirstSync(vec![remote_product(
            "p1",
            json!({ "id": "p1", "name": "remote" }),
            local_time - ChronoDuration::hours(1),
        )]),
    )
    .await;

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.entities()
        .upsert_local(
            SyncEntity::Product,
            "p1",
            &json!({ "id": "p1", "name": "local" }),
            local_time,
        )
        .await
        .unwrap();

    let mut config = SyncConfig::default();
    config.backend.api_base_url = server.uri();
    config.sync.sync_interval_secs = 0;
    config.sync.conflict_policy = ConflictPolicy::LocalWins;
    let engine = SyncEngine::new(config, db.clone()).unwrap();

    let result = engine.sync_now().await.unwrap();
    assert!(result.conflicts.is_empty());

    // Local row kept, and a fresh upload was queued to converge the server.
    let row = db.entities().get(SyncEntity::Product, "p1").await.unwrap().unwrap();
    assert_eq!(row.data["name"], "local");

    let queued = db.sync_queue().get_pending(10, 10).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].operation, SyncOperation::Update);
    assert_eq!(queued[0].payload["name"], "local");
}

#[tokio::test]
async fn merge_resolution_combines_fields_and_requeues() {
    let server = MockServer::start().await;
    mount_upload(&server, AckAll).await;

    let local_time = Utc::now();
    mount_download(
        &server,
        EntitiesOnFirstSync(vec![remote_product(
            "p1",
            json!({ "id": "p1", "name": "remote", "stock": 5 }),
            local_time - ChronoDuration::hours(1),
        )]),
    )
    .await;

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.entities()
        .upsert_local(
            SyncEntity::Product,
            "p1",
            &json!({ "id": "p1", "name": "local", "price": 100 }),
            local_time,
        )
        .await
        .unwrap();

    let mut config = SyncConfig::default();
    config.backend.api_base_url = server.uri();
    config.sync.sync_interval_secs = 0;
    let engine = SyncEngine::new(config, db.clone()).unwrap();

    let result = engine.sync_now().await.unwrap();
    let conflict_id = result.conflicts[0].id.clone();

    engine
        .resolve_conflict(&conflict_id, ConflictResolution::Merge)
        .await
        .unwrap();

    // Remote base, local keys win, fields from both sides survive.
    let row = db.entities().get(SyncEntity::Product, "p1").await.unwrap().unwrap();
    assert_eq!(row.data["name"], "local");
    assert_eq!(row.data["price"], 100);
    assert_eq!(row.data["stock"], 5);
}

#[tokio::test]
async fn merge_is_rejected_for_deleted_modified_conflicts() {
    let server = MockServer::start().await;
    mount_upload(&server, AckAll).await;

    let local_time = Utc::now();
    let remote_time = local_time - ChronoDuration::hours(1);
    mount_download(
        &server,
        EntitiesOnFirstSync(vec![json!({
            "id": "p1",
            "entity": "product",
            "data": { "id": "p1" },
            "updated_at": remote_time.to_rfc3339(),
            "deleted_at": remote_time.to_rfc3339(),
            "version": 2
        })]),
    )
    .await;

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.entities()
        .upsert_local(
            SyncEntity::Product,
            "p1",
            &json!({ "id": "p1", "name": "local" }),
            local_time,
        )
        .await
        .unwrap();

    let mut config = SyncConfig::default();
    config.backend.api_base_url = server.uri();
    config.sync.sync_interval_secs = 0;
    let engine = SyncEngine::new(config, db.clone()).unwrap();

    let result = engine.sync_now().await.unwrap();
    assert_eq!(result.conflicts[0].kind, ConflictKind::DeletedModified);
    let conflict_id = result.conflicts[0].id.clone();

    match engine
        .resolve_conflict(&conflict_id, ConflictResolution::Merge)
        .await
    {
        Err(SyncError::InvalidResolution { .. }) => {}
        other => panic!("expected InvalidResolution, got {other:?}"),
    }
    // A failed resolution does not consume the conflict.
    assert_eq!(engine.pending_conflicts().len(), 1);

    // Accepting the remote applies the tombstone locally.
    engine
        .resolve_conflict(&conflict_id, ConflictResolution::Remote)
        .await
        .unwrap();
    let row = db.entities().get(SyncEntity::Product, "p1").await.unwrap().unwrap();
    assert!(row.deleted_at.is_some());
}

// =============================================================================
// Maintenance
// =============================================================================

#[tokio::test]
async fn maintenance_leaves_recent_synced_rows_alone() {
    let server = MockServer::start().await;
    mount_upload(&server, AckAll).await;
    mount_download(&server, empty_download()).await;

    let engine = engine_against(&server, ConflictPolicy::Manual).await;
    queue_product(&engine, "p1", "Beans").await;
    engine.sync_now().await.unwrap();

    // Freshly synced rows are inside the retention window.
    let removed = engine.run_maintenance().await.unwrap();
    assert_eq!(removed, 0);
}
