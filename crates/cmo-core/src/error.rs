// crates/cmo-core/src/error.rs
// ============================================================================
// Module: Error Taxonomy
// Description: Per-component error enums and the top-level aggregate error.
// Purpose: Give every fatal condition a stable, matchable code while keeping
//          each component's error type scoped to its own concerns.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Each component of the engine defines its own error enum; the runtime
//! executor aggregates them into [`EngineError`] so a single `Result` type
//! can flow across the policy/activity/store/transport boundary without
//! components depending on each other's error types directly.

use thiserror::Error;

// ============================================================================
// SECTION: Validation Errors
// ============================================================================

/// Errors raised while validating an envelope against its registered schemas.
///
/// # Invariants
/// - Variants map one-to-one onto the validation error taxonomy.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// `meta` failed validation against `EnvelopeMeta`.
    #[error("meta schema invalid: {0}")]
    MetaSchemaInvalid(String),
    /// `payload` failed validation against the schema for its message type.
    #[error("payload schema invalid at {pointers:?}: {message}")]
    PayloadSchemaInvalid {
        /// JSON-pointer paths to the offending fields.
        pointers: Vec<String>,
        /// Human-readable summary.
        message: String,
    },
    /// `meta.messageType` has no registered payload schema.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
}

// ============================================================================
// SECTION: Policy Errors
// ============================================================================

/// Errors raised by the policy evaluator.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy bundle could not be loaded.
    #[error("policy bundle load failed: {0}")]
    BundleLoadFailed(String),
    /// The policy module raised an error while evaluating a gate.
    #[error("policy evaluation failed: {0}")]
    EvaluationFailed(String),
}

// ============================================================================
// SECTION: Node / Activity Errors
// ============================================================================

/// Errors raised while invoking a node function.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node function failed and has no retries remaining (or none configured).
    #[error("node failed: {0}")]
    NodeFailed(String),
    /// The node function failed after exhausting its configured retry budget.
    #[error("node exhausted retries after {attempts} attempts: {message}")]
    NodeExhaustedRetries {
        /// Number of attempts made.
        attempts: u32,
        /// Last failure message.
        message: String,
    },
    /// The node function did not return before its per-node deadline.
    #[error("node timed out after {0}ms")]
    NodeTimeout(u64),
}

/// Errors raised by the activity boundary.
#[derive(Debug, Error)]
pub enum ActivityError {
    /// REPLAY mode found no persisted record for the requested activity.
    #[error("replay record missing for activity {activity_type} request {request_hash}")]
    ReplayRecordMissing {
        /// The activity type that was requested.
        activity_type: String,
        /// The canonical request hash that was looked up.
        request_hash: String,
    },
    /// The underlying call (HTTP, MCP, database, transport) failed.
    #[error("activity call failed: {0}")]
    CallFailed(String),
    /// The activity boundary's cancellation signal was set.
    #[error("activity cancelled")]
    Cancelled,
}

// ============================================================================
// SECTION: Routing Errors
// ============================================================================

/// Errors raised while routing from one node to the next.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// A node returned a `next` key with no matching edge.
    #[error("unrouted next edge: {0}")]
    UnroutedNext(String),
    /// More than one edge matched the node's output.
    #[error("ambiguous next edge: {0}")]
    AmbiguousNext(String),
}

// ============================================================================
// SECTION: Checkpoint Store Errors
// ============================================================================

/// Errors raised by a checkpoint store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write conflicted with an existing record of different content.
    #[error("checkpoint divergence at ({trace_id}, {step_index}): {detail}")]
    CheckpointDivergence {
        /// The run whose checkpoint diverged.
        trace_id: String,
        /// The step index at which divergence was detected.
        step_index: u64,
        /// Description of the mismatch.
        detail: String,
    },
    /// The store could not be reached or did not respond.
    #[error("checkpoint store unavailable: {0}")]
    StoreUnavailable(String),
    /// An attempted run status transition was not monotonic.
    #[error("invalid run status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Prior status.
        from: String,
        /// Attempted next status.
        to: String,
    },
}

// ============================================================================
// SECTION: Replay Errors
// ============================================================================

/// Errors raised while resuming or replaying a run.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// An activity record required for replay was not found.
    #[error("replay record missing at step {step_index}: {activity_type}")]
    ReplayRecordMissing {
        /// The step index being replayed.
        step_index: u64,
        /// The activity type that could not be found.
        activity_type: String,
    },
    /// Recomputed state diverged from the persisted record during resume.
    #[error("resume divergence at step {step_index}: {hash_name}")]
    ResumeDivergence {
        /// The step index at which divergence was detected.
        step_index: u64,
        /// Name of the mismatched hash (e.g. `stateHashAfter`).
        hash_name: String,
    },
    /// Recomputed state diverged from the persisted record during verification replay.
    #[error("replay divergence at step {step_index}: {hash_name}")]
    ReplayDivergence {
        /// The step index at which divergence was detected.
        step_index: u64,
        /// Name of the mismatched hash.
        hash_name: String,
    },
}

// ============================================================================
// SECTION: Transport Errors
// ============================================================================

/// Errors raised by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// `publish` could not hand the message to the underlying backend.
    #[error("publish failed: {0}")]
    PublishFailed(String),
    /// `request` received no reply before its timeout elapsed.
    #[error("request timed out after {0}ms")]
    RequestTimeout(u64),
    /// A message exceeded its maximum delivery attempts and moved to the DLQ.
    #[error("delivery attempts exceeded for message {message_id}")]
    DeliveryExceeded {
        /// Identifier of the message that was dead-lettered.
        message_id: String,
    },
}

// ============================================================================
// SECTION: Lifecycle Errors
// ============================================================================

/// Errors raised while loading configuration or starting the process.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The configuration failed validation.
    #[error("config invalid: {0}")]
    ConfigInvalid(String),
    /// A component failed to initialize during startup.
    #[error("init failed: {0}")]
    InitFailed(String),
    /// The process is shutting down and could not finish in-flight runs.
    #[error("shutdown")]
    Shutdown,
}

// ============================================================================
// SECTION: Aggregate Error
// ============================================================================

/// The top-level error type produced by the runtime executor, aggregating
/// every component's error enum.
///
/// # Invariants
/// - Every variant maps to exactly one component error enum via `#[from]`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// See [`SchemaError`].
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// See [`PolicyError`].
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// See [`NodeError`].
    #[error(transparent)]
    Node(#[from] NodeError),
    /// See [`ActivityError`].
    #[error(transparent)]
    Activity(#[from] ActivityError),
    /// See [`RoutingError`].
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// See [`StoreError`].
    #[error(transparent)]
    Store(#[from] StoreError),
    /// See [`ReplayError`].
    #[error(transparent)]
    Replay(#[from] ReplayError),
    /// See [`TransportError`].
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// See [`LifecycleError`].
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl EngineError {
    /// Returns the stable error code associated with this error, matching
    /// the taxonomy entries used on `runs.error` and `steps.error`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Schema(SchemaError::MetaSchemaInvalid(_)) => "META_SCHEMA_INVALID",
            Self::Schema(SchemaError::PayloadSchemaInvalid { .. }) => "PAYLOAD_SCHEMA_INVALID",
            Self::Schema(SchemaError::UnknownMessageType(_)) => "UNKNOWN_MESSAGE_TYPE",
            Self::Policy(PolicyError::BundleLoadFailed(_) | PolicyError::EvaluationFailed(_)) => {
                "POLICY_ERROR"
            }
            Self::Node(NodeError::NodeFailed(_)) => "NODE_FAILED",
            Self::Node(NodeError::NodeExhaustedRetries { .. }) => "NODE_EXHAUSTED_RETRIES",
            Self::Node(NodeError::NodeTimeout(_)) => "NODE_TIMEOUT",
            Self::Activity(ActivityError::ReplayRecordMissing { .. }) => "REPLAY_RECORD_MISSING",
            Self::Activity(ActivityError::CallFailed(_) | ActivityError::Cancelled) => {
                "ACTIVITY_FAILED"
            }
            Self::Routing(RoutingError::UnroutedNext(_)) => "UNROUTED_NEXT",
            Self::Routing(RoutingError::AmbiguousNext(_)) => "AMBIGUOUS_NEXT",
            Self::Store(StoreError::CheckpointDivergence { .. }) => "CHECKPOINT_DIVERGENCE",
            Self::Store(StoreError::StoreUnavailable(_)) => "STORE_UNAVAILABLE",
            Self::Store(StoreError::InvalidStatusTransition { .. }) => "INVALID_STATUS_TRANSITION",
            Self::Replay(ReplayError::ReplayRecordMissing { .. }) => "REPLAY_RECORD_MISSING",
            Self::Replay(ReplayError::ResumeDivergence { .. }) => "RESUME_DIVERGENCE",
            Self::Replay(ReplayError::ReplayDivergence { .. }) => "REPLAY_DIVERGENCE",
            Self::Transport(TransportError::PublishFailed(_)) => "PUBLISH_FAILED",
            Self::Transport(TransportError::RequestTimeout(_)) => "REQUEST_TIMEOUT",
            Self::Transport(TransportError::DeliveryExceeded { .. }) => "DELIVERY_EXCEEDED",
            Self::Lifecycle(LifecycleError::ConfigInvalid(_)) => "CONFIG_INVALID",
            Self::Lifecycle(LifecycleError::InitFailed(_)) => "INIT_FAILED",
            Self::Lifecycle(LifecycleError::Shutdown) => "SHUTDOWN",
        }
    }
}
