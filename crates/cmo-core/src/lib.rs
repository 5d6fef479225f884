// crates/cmo-core/src/lib.rs
// ============================================================================
// Crate: cmo-core
// Description: Canonical data model, capability traits, hashing, and the
//              error taxonomy shared by every CMO/ELG crate.
// ============================================================================

//! `cmo-core` has no knowledge of SQLite, WASM, or any wire transport — it
//! defines what a graph, a run, and a checkpoint *are*, and the capability
//! traits (`interfaces`) concrete backends implement. Everything else in
//! the workspace depends on this crate; this crate depends on nothing in
//! the workspace.

pub mod core;
pub mod error;
pub mod interfaces;

/// Canonical JSON encoding and SHA-256 hashing, re-exported at the crate
/// root so call sites read as `cmo_core::hashing::hash_canonical_json`.
pub use crate::core::hashing;
