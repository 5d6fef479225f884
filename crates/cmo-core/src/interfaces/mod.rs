// crates/cmo-core/src/interfaces/mod.rs
// ============================================================================
// Module: Capability Interfaces
// Description: Trait-based capability sets for the activity boundary,
//              checkpoint store, transport, and policy evaluator.
// Purpose: Let the runtime executor compose concrete backends without
//          inheritance; every backend implements one of these traits.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Each trait in this module is a capability set, not a base class: a
//! concrete checkpoint store or transport implements the trait and is
//! injected into the runtime as a trait object. Nothing here assumes a
//! particular backend (SQLite, a log-stream broker, a WASM policy bundle);
//! those live in their own crates and depend on this one, never the other
//! way around.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::core::envelope::Envelope;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::ConsumerGroup;
use crate::core::identifiers::GraphId;
use crate::core::identifiers::GraphVersion;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::PolicyBundleId;
use crate::core::identifiers::StepIndex;
use crate::core::identifiers::Topic;
use crate::core::identifiers::TraceId;
use crate::core::policy::PolicyDecision;
use crate::core::run::ActivityRecord;
use crate::core::run::ActivityType;
use crate::core::run::Run;
use crate::core::run::RunStatus;
use crate::core::run::StepRecord;
use crate::error::ActivityError;
use crate::error::PolicyError;
use crate::error::StoreError;
use crate::error::TransportError;

// ============================================================================
// SECTION: Activity Boundary Capability Types
// ============================================================================

/// An outbound HTTP request issued through the activity boundary.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpRequest {
    /// HTTP method (e.g. `"GET"`, `"POST"`).
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Request body, if any.
    pub body: Option<Value>,
}

/// The response to an [`HttpRequest`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body, if any.
    pub body: Option<Value>,
}

/// A call to an external tool endpoint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct McpRequest {
    /// Name of the tool being invoked.
    pub tool: String,
    /// Arguments passed to the tool.
    pub arguments: Value,
}

/// The result of an [`McpRequest`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct McpResponse {
    /// Structured result returned by the tool.
    pub result: Value,
}

/// A query against an external datastore.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseQuery {
    /// Query text or identifier understood by the datastore adapter.
    pub statement: String,
    /// Bound parameters.
    pub parameters: Vec<Value>,
}

/// The result of a [`DatabaseQuery`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseQueryResult {
    /// Rows returned, each a JSON object keyed by column name.
    pub rows: Vec<Value>,
}

/// An opaque handle to a blob written through the activity boundary.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ArtifactRef {
    /// Backend-specific handle (e.g. an object key).
    pub handle: String,
}

// ============================================================================
// SECTION: Activity Client
// ============================================================================

/// The single capability interface through which a node function may
/// observe or affect the outside world.
///
/// # Invariants
/// - Every method is recorded (RECORD mode), replayed (REPLAY mode), or
///   executed without persistence (LIVE mode) by the concrete
///   implementation; node functions never distinguish between modes.
/// - `is_cancelled` must be checked by the caller at every suspension
///   point; implementations never block past a positive cancellation
///   signal.
pub trait ActivityClient: Send {
    /// Returns the current virtual timestamp, advancing the clock.
    fn now(&mut self) -> crate::core::time::Timestamp;

    /// Returns a deterministic pseudo-random value, optionally bounded
    /// exclusive of `bound`.
    fn rand(&mut self, bound: Option<u64>) -> u64;

    /// Performs an HTTP call.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError`] on transport failure or, in REPLAY mode,
    /// when no matching record exists.
    fn http_request(&mut self, request: HttpRequest) -> Result<HttpResponse, ActivityError>;

    /// Publishes a validated envelope through the transport.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError`] on transport failure or a missing replay
    /// record.
    fn send_a2a(&mut self, envelope: Envelope) -> Result<(), ActivityError>;

    /// Calls an external tool endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError`] on call failure or a missing replay
    /// record.
    fn call_mcp(&mut self, request: McpRequest) -> Result<McpResponse, ActivityError>;

    /// Runs a query against an external datastore.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError`] on query failure or a missing replay
    /// record.
    fn database_query(&mut self, query: DatabaseQuery) -> Result<DatabaseQueryResult, ActivityError>;

    /// Reads a blob previously written through [`ActivityClient::write_artifact`].
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError`] when the artifact cannot be read or no
    /// replay record exists.
    fn read_artifact(&mut self, reference: &ArtifactRef) -> Result<Vec<u8>, ActivityError>;

    /// Writes a blob, returning a handle recorded for future reads.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError`] when the write fails.
    fn write_artifact(&mut self, bytes: Vec<u8>) -> Result<ArtifactRef, ActivityError>;

    /// Returns whether the run's cancellation signal has been set, either
    /// by an explicit `abort` or a per-node/whole-run timeout.
    fn is_cancelled(&self) -> bool;
}

// ============================================================================
// SECTION: Blob Store
// ============================================================================

/// The blob-store side of the activity boundary's `readArtifact`/
/// `writeArtifact` pair.
///
/// Concrete storage back-ends (S3-compatible object stores) are out of
/// scope for this workspace; this trait fixes the contract a reference or
/// test backend must satisfy.
pub trait BlobStore: Send + Sync {
    /// Reads back a blob previously returned by [`BlobStore::write`].
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError::CallFailed`] when `reference` is unknown.
    fn read(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ActivityError>;

    /// Writes a blob, returning a handle that [`BlobStore::read`] can later
    /// resolve.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError::CallFailed`] when the write fails.
    fn write(&self, bytes: Vec<u8>) -> Result<ArtifactRef, ActivityError>;
}

// ============================================================================
// SECTION: External Tool / Datastore Clients
// ============================================================================

/// The external-tool side of the activity boundary's `callMCP` operation.
///
/// Concrete tool integrations are out of scope; this is the seam a host
/// application plugs a real dispatcher into.
pub trait McpClient: Send + Sync {
    /// Invokes a named tool with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError::CallFailed`] when the call fails.
    fn call(&self, request: &McpRequest) -> Result<McpResponse, ActivityError>;
}

/// The external-datastore side of the activity boundary's `databaseQuery`
/// operation.
///
/// Concrete datastore drivers (Postgres, etc.) are out of scope; this is
/// the seam a host application plugs a real driver into.
pub trait DatabaseClient: Send + Sync {
    /// Runs a query against the backing datastore.
    ///
    /// # Errors
    ///
    /// Returns [`ActivityError::CallFailed`] when the query fails.
    fn query(&self, query: &DatabaseQuery) -> Result<DatabaseQueryResult, ActivityError>;
}

// ============================================================================
// SECTION: Checkpoint Store
// ============================================================================

/// Round-trip latency and liveness of a checkpoint store.
#[derive(Debug, Clone, Copy)]
pub struct HealthStatus {
    /// Whether the store responded successfully.
    pub healthy: bool,
    /// Measured round-trip latency of the health probe.
    pub latency: std::time::Duration,
}

/// Durable persistence of runs, step records, and activity records.
///
/// # Invariants
/// - `save_step` and `save_activity` are idempotent on repeat writes of
///   identical content and fail with [`StoreError::CheckpointDivergence`]
///   on a conflicting write to an existing key.
/// - `update_run_status` enforces monotonic status transitions.
pub trait CheckpointStore: Send + Sync {
    /// Creates schema if absent. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreUnavailable`] if the store cannot be
    /// reached.
    fn initialize(&self) -> Result<(), StoreError>;

    /// Upserts a run, keyed by `traceId`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on failure.
    fn save_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Returns the run record for `trace_id`, if one has been saved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on failure.
    fn get_run(&self, trace_id: &TraceId) -> Result<Option<Run>, StoreError>;

    /// Returns every run's `traceId`, most recently started first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on failure.
    fn list_runs(&self) -> Result<Vec<TraceId>, StoreError>;

    /// Transitions a run's status, enforcing monotonicity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidStatusTransition`] on a non-monotonic
    /// transition.
    fn update_run_status(
        &self,
        trace_id: &TraceId,
        status: RunStatus,
        error: Option<Value>,
    ) -> Result<(), StoreError>;

    /// Upserts a step record, keyed by `(traceId, stepIndex)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CheckpointDivergence`] when a different
    /// record already exists for the same key.
    fn save_step(&self, step: &StepRecord) -> Result<(), StoreError>;

    /// Returns the most recent step record for a run, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on failure.
    fn get_last_step(&self, trace_id: &TraceId) -> Result<Option<StepRecord>, StoreError>;

    /// Returns all step records for a run in ascending `stepIndex` order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on failure.
    fn get_all_steps(&self, trace_id: &TraceId) -> Result<Vec<StepRecord>, StoreError>;

    /// Upserts an activity record, keyed by
    /// `(traceId, stepIndex, activityType, requestHash)`. Unlike
    /// [`CheckpointStore::save_step`], a conflicting re-save overwrites the
    /// existing record rather than erroring: `requestHash` is the
    /// idempotency key across retries, so a failed attempt followed by a
    /// successful one under the same key is expected, not divergence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on failure.
    fn save_activity(&self, record: &ActivityRecord) -> Result<(), StoreError>;

    /// Looks up a single activity record by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on failure.
    fn get_activity(
        &self,
        trace_id: &TraceId,
        step_index: StepIndex,
        activity_type: ActivityType,
        request_hash: &str,
    ) -> Result<Option<ActivityRecord>, StoreError>;

    /// Returns all activity records for a step, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on failure.
    fn get_activities_for_step(
        &self,
        trace_id: &TraceId,
        step_index: StepIndex,
    ) -> Result<Vec<ActivityRecord>, StoreError>;

    /// Probes store liveness and measures round-trip latency.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the probe itself cannot be issued.
    fn health_check(&self) -> Result<HealthStatus, StoreError>;

    /// Performs a graceful shutdown, flushing any buffered writes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the shutdown could not complete cleanly.
    fn close(&self) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Disposition a subscriber assigns to a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Message processed successfully; remove it from the pending set.
    Ack,
    /// Message failed transiently; redeliver, counting against
    /// `maxDeliveryAttempts`.
    Nack,
    /// Message is unprocessable; route straight to the DLQ.
    Reject,
}

/// Options controlling a single `publish` call.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// When set, suppresses duplicate publishes within the dedupe window.
    pub dedupe_key: Option<String>,
}

/// The identifier assigned to a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageId(pub String);

/// A handle to an active subscription; dropping it does not itself cancel
/// delivery, callers must call [`Transport::close`] or the backend's own
/// unsubscribe path.
pub trait Subscription: Send {
    /// Stops delivering new messages to this subscription.
    fn cancel(&mut self);
}

/// Aggregate delivery and queue-depth statistics for a transport instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    /// Messages published since startup.
    pub published: u64,
    /// Messages delivered to a handler since startup.
    pub delivered: u64,
    /// Messages currently in the dead-letter queue.
    pub dead_lettered: u64,
}

/// A log-style publish/subscribe capability set with consumer groups,
/// at-least-once delivery, and dead-lettering.
///
/// # Invariants
/// - `subscribe` delivers each message to exactly one consumer per group.
/// - A message NACKed more than the configured `maxDeliveryAttempts` is
///   routed to the topic's dead-letter topic.
pub trait Transport: Send + Sync {
    /// Publishes an envelope to a topic, returning its assigned message id.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PublishFailed`] when the backend rejects
    /// the publish.
    fn publish(
        &self,
        topic: &Topic,
        envelope: &Envelope,
        options: PublishOptions,
    ) -> Result<MessageId, TransportError>;

    /// Subscribes a consumer group to a topic. `handler` is invoked for
    /// each delivered envelope and must return a [`DeliveryOutcome`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the subscription could not be
    /// established.
    fn subscribe(
        &self,
        topic: &Topic,
        group: &ConsumerGroup,
        handler: Box<dyn FnMut(Envelope) -> DeliveryOutcome + Send>,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    /// Publishes an envelope and waits for a correlated reply.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::RequestTimeout`] when no reply arrives
    /// before `timeout`.
    fn request(
        &self,
        topic: &Topic,
        envelope: &Envelope,
        timeout: std::time::Duration,
    ) -> Result<Envelope, TransportError>;

    /// Returns aggregate delivery statistics.
    fn stats(&self) -> TransportStats;

    /// Probes transport liveness.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the probe could not be issued.
    fn health(&self) -> Result<HealthStatus, TransportError>;

    /// Performs a graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the shutdown could not complete
    /// cleanly.
    fn close(&self) -> Result<(), TransportError>;
}

// ============================================================================
// SECTION: Policy Evaluator
// ============================================================================

/// Pre- and post-execution policy gates backed by a loaded policy bundle.
///
/// # Invariants
/// - When disabled by configuration, both gates always return
///   `PolicyDecision::allow()` without touching a bundle.
pub trait PolicyEvaluator: Send + Sync {
    /// Loads the policy module from `bundle_path`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::BundleLoadFailed`] if the bundle cannot be
    /// read or is not a valid module.
    fn initialize(&mut self, bundle_id: &PolicyBundleId, bundle_path: &str) -> Result<(), PolicyError>;

    /// Evaluates the pre-execution gate for a node.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EvaluationFailed`] if the policy module
    /// itself errors.
    #[allow(clippy::too_many_arguments, reason = "one argument per correlation key plus the input value")]
    fn check_pre_execution(
        &self,
        graph_id: &GraphId,
        graph_version: &GraphVersion,
        trace_id: &TraceId,
        step_index: StepIndex,
        node_id: &NodeId,
        input: &Value,
    ) -> Result<PolicyDecision, PolicyError>;

    /// Evaluates the post-execution gate for a node.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EvaluationFailed`] if the policy module
    /// itself errors.
    #[allow(clippy::too_many_arguments, reason = "one argument per correlation key plus the input value")]
    fn check_post_execution(
        &self,
        graph_id: &GraphId,
        graph_version: &GraphVersion,
        trace_id: &TraceId,
        step_index: StepIndex,
        node_id: &NodeId,
        result: &Value,
    ) -> Result<PolicyDecision, PolicyError>;
}

/// Identifies the originating or destination agent of an envelope; kept
/// here (rather than only in `core::envelope`) since transport
/// implementations address subscribers by it directly.
pub type EnvelopeAgentId = AgentId;
