//! # Repository Module
//!
//! Database repository implementations for the sync engine's durable state.
//!
//! ## Available Repositories
//!
//! - [`queue::SyncQueueRepository`] - Pending-mutation queue (outbox)
//! - [`meta::MetaRepository`] - Key/value store for the sync cursor
//! - [`entity::EntityRepository`] - Entity mirror tables (apply remote rows)
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SyncEngine                                                             │
//! │       │  db.sync_queue().get_pending(100)                              │
//! │       ▼                                                                 │
//! │  SyncQueueRepository ── SQL ──► SQLite                                  │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • SQL is isolated in one place                                        │
//! │  • Row ↔ domain type conversion lives next to the schema               │
//! │  • Repositories are cheap clones over the shared pool                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod entity;
pub mod meta;
pub mod queue;
