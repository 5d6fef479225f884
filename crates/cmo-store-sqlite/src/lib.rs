// crates/cmo-store-sqlite/src/lib.rs
// ============================================================================
// Crate: cmo-store-sqlite
// Description: SQLite-backed durable checkpoint store.
// Purpose: Implement `cmo_core::interfaces::CheckpointStore` against a
//          single-file SQLite database with WAL durability.
// Dependencies: cmo-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteCheckpointStore`] persists the `runs`, `steps`, and `activities`
//! relations the executor and replay tool depend on. A single `SQLite`
//! connection, guarded by a mutex, backs the whole store; writes are small
//! enough that serializing them costs nothing the WAL journal wouldn't cost
//! anyway.

pub mod store;

pub use crate::store::SqliteCheckpointStore;
pub use crate::store::SqliteStoreConfig;
pub use crate::store::SqliteStoreError;
pub use crate::store::SqliteSyncMode;
