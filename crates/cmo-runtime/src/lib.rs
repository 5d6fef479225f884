// crates/cmo-runtime/src/lib.rs
// ============================================================================
// Crate: cmo-runtime
// Description: The deterministic activity boundary and the runtime executor
//              that drives a graph through it.
// Purpose: Turn a `Graph` plus a checkpoint store and policy evaluator into
//          RECORD/REPLAY-reproducible runs.
// Dependencies: base64, cmo-core, rand, reqwest, serde, serde_json,
//               thiserror, tracing
// ============================================================================

//! ## Overview
//! [`activity`] implements [`cmo_core::interfaces::ActivityClient`]; every
//! node-visible non-determinism (time, randomness, HTTP, A2A, MCP,
//! database, blob I/O) flows through it. [`executor`] implements the
//! main-loop graph interpreter: it constructs one activity-boundary client
//! per node-invocation attempt, walks the graph from a node's returned
//! `next` key, and persists a [`cmo_core::core::run::StepRecord`] per step.
//! [`rng`] is the deterministic generator `activity` draws `rand()` from.

pub mod activity;
pub mod executor;
pub mod rng;

pub use crate::activity::ActivityContext;
pub use crate::activity::ActivityMode;
pub use crate::activity::RuntimeActivityClient;
pub use crate::executor::ExecutionResult;
pub use crate::executor::ExecutorBackends;
pub use crate::executor::ExecutorConfig;
pub use crate::executor::RuntimeExecutor;
