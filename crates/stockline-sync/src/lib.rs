//! # Stockline Sync Engine
//!
//! Offline-first synchronization between a device's local SQLite store and a
//! remote backend. Local mutations queue in an outbox and drain whenever a
//! backend is reachable; remote changes download incrementally from a
//! persisted cursor and fold into the local entity mirrors.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                              SyncEngine                               │
//! │                                                                       │
//! │   queue_operation()          sync_now()            subscribe()        │
//! │        │                         │                      │             │
//! │        ▼                         ▼                      ▼             │
//! │  ┌──────────┐    ┌───────────────────────────┐   ┌──────────────┐    │
//! │  │ sync     │───►│ upload ──► download        │   │ State        │    │
//! │  │ queue    │    │ (SyncBackend trait)        │──►│ Publisher    │    │
//! │  │ (SQLite) │    │   • RestBackend            │   │              │    │
//! │  └──────────┘    │   • TableBackend           │   └──────────────┘    │
//! │                  └───────────────────────────┘                        │
//! │                          │                                            │
//! │                          ▼                                            │
//! │                  ┌──────────────┐        ┌──────────────────────┐    │
//! │                  │ entity       │        │ ConflictStore        │    │
//! │                  │ mirrors      │        │ (manual resolution)  │    │
//! │                  └──────────────┘        └──────────────────────┘    │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use stockline_core::{SyncEntity, SyncOperation};
//! use stockline_db::{Database, DbConfig};
//! use stockline_sync::{SyncConfig, SyncEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DbConfig::new("stockline.db")).await?;
//! let engine = SyncEngine::new(SyncConfig::load()?, db)?;
//! engine.initialize().await?;
//!
//! engine
//!     .queue_operation(
//!         SyncEntity::Product,
//!         SyncOperation::Create,
//!         serde_json::json!({ "id": "p1", "name": "Beans", "price": 250 }),
//!     )
//!     .await?;
//!
//! let result = engine.sync_now().await?;
//! println!("synced {} records", result.synced_records);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod conflicts;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod rest;
pub mod scheduler;
pub mod state;
pub mod table;

pub use backend::{build_backend, SyncBackend, UploadOutcome};
pub use config::{BackendKind, BackendSettings, ConflictPolicy, DeviceConfig, SyncConfig, SyncSettings};
pub use conflicts::{ConflictStore, PendingConflict};
pub use engine::SyncEngine;
pub use error::{EngineResult, SyncError};
pub use protocol::RecordFailure;
pub use rest::RestBackend;
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use state::{StatePublisher, Subscription};
pub use table::TableBackend;
