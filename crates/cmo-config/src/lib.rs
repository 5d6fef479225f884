// crates/cmo-config/src/lib.rs
// ============================================================================
// Crate: cmo-config
// Description: Startup configuration: loading, environment overrides,
//              validation, and generated reference artifacts.
// Purpose: The single source of truth for every option the engine reads at
//          startup; nothing downstream reads an environment variable
//          directly once this crate has produced an `EngineConfig`.
// Dependencies: cmo-core, jsonschema, serde, serde_json, thiserror, toml
// ============================================================================

//! ## Overview
//! Configuration is TOML on disk, overridable by environment variables, and
//! validated once at startup into an immutable [`EngineConfig`]. Secret-like
//! fields (passwords, credentials) are never written out by the `Debug`
//! impls in this crate.

pub mod config;
pub mod docs;
pub mod schema;

pub use crate::config::ConfigError;
pub use crate::config::EngineConfig;
