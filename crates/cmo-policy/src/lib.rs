// crates/cmo-policy/src/lib.rs
// ============================================================================
// Crate: cmo-policy
// Description: WebAssembly-backed pre/post-execution policy gates.
// Purpose: Implement `cmo_core::interfaces::PolicyEvaluator` against bundles
//          compiled to WebAssembly, sandboxed with fuel and memory limits so
//          a misbehaving policy module cannot hang or exhaust the host
//          process.
// Dependencies: cmo-core, serde_jcs, serde_json, thiserror, tracing, wasmtime
// ============================================================================

//! ## Overview
//! A policy bundle exports two functions, `check_pre` and `check_post`,
//! each taking a pointer and length into the module's linear memory (the
//! canonical-JSON request) and returning a packed `(ptr << 32) | len`
//! pointing at a canonical-JSON [`PolicyDecision`] in the same memory. The
//! module must also export `alloc(len: i32) -> i32` so the host can place
//! the request bytes before calling the gate. When `policy.enabled = false`
//! at the configuration layer, callers should use [`NoopPolicyEvaluator`]
//! instead of this crate's WASM evaluator, so a missing bundle path is
//! never a startup error.

pub mod noop;
pub mod wasm;

pub use crate::noop::NoopPolicyEvaluator;
pub use crate::wasm::WasmPolicyEvaluator;
pub use crate::wasm::WasmPolicyLimits;
