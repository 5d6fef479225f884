// crates/cmo-core/src/core/run.rs
// ============================================================================
// Module: Run, StepRecord, ActivityRecord
// Description: The durable execution record of a single graph run.
// Purpose: Define the checkpoint store's unit of persistence; these types
//          are serialized as-is into the `runs`/`steps`/`activities`
//          relations.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`Run`] owns a monotonic status. Each step the runtime executes
//! produces one [`StepRecord`], and each non-deterministic call a node
//! makes through the activity boundary produces one [`ActivityRecord`]
//! nested under that step.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::GraphId;
use crate::core::identifiers::GraphVersion;
use crate::core::identifiers::StepIndex;
use crate::core::identifiers::TraceId;
use crate::core::time::Timestamp;
use crate::interfaces::ArtifactRef;

// ============================================================================
// SECTION: Run
// ============================================================================

/// The lifecycle state of a run.
///
/// # Invariants
/// - Transitions are monotonic: `PENDING -> RUNNING -> {COMPLETED, FAILED,
///   TIMEOUT, ABORTED}`. No terminal status transitions to any other
///   status, and `RUNNING` never transitions back to `PENDING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Created but not yet executing.
    Pending,
    /// Actively executing steps.
    Running,
    /// Reached a terminal node with no fatal error.
    Completed,
    /// Terminated due to a fatal error.
    Failed,
    /// Terminated because the whole-run timeout elapsed.
    Timeout,
    /// Terminated by an external `abort` call.
    Aborted,
}

impl RunStatus {
    /// Returns whether this status is terminal (no further transitions
    /// are valid from it).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout | Self::Aborted)
    }

    /// Returns whether transitioning from `self` to `next` is permitted.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Aborted),
            Self::Running => !matches!(next, Self::Pending),
            Self::Completed | Self::Failed | Self::Timeout | Self::Aborted => false,
        }
    }
}

/// A structured error attached to a run or step record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code from the taxonomy (e.g. `"POLICY_DENIED_PRE"`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Free-form structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// A single execution of a graph against an initial input.
///
/// # Invariants
/// - `traceId` is unique across all runs.
/// - `status` transitions monotonically per [`RunStatus::can_transition_to`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier of this run.
    #[serde(rename = "traceId")]
    pub trace_id: TraceId,
    /// Graph this run executes.
    #[serde(rename = "graphId")]
    pub graph_id: GraphId,
    /// Version of the graph this run executes.
    #[serde(rename = "graphVersion")]
    pub graph_version: GraphVersion,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// When the run was created.
    #[serde(rename = "startedAt")]
    pub started_at: Timestamp,
    /// When the run reached a terminal status, if it has.
    #[serde(rename = "finishedAt", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// The fatal error that terminated the run, if `status` is `FAILED`,
    /// `TIMEOUT`, or `ABORTED` for a reason other than a clean stop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

// ============================================================================
// SECTION: Step Record
// ============================================================================

/// The durable record of one node invocation within a run.
///
/// # Invariants
/// - `(traceId, stepIndex)` is unique.
/// - `stateHashBefore` equals the prior step's `stateHashAfter`, or the
///   initial-state hash when `stepIndex == 0`.
/// - `stepIndex` values within a run are contiguous from 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Run this step belongs to.
    #[serde(rename = "traceId")]
    pub trace_id: TraceId,
    /// Zero-based, monotonic index of this step within the run.
    #[serde(rename = "stepIndex")]
    pub step_index: StepIndex,
    /// Node this step executed.
    #[serde(rename = "nodeId")]
    pub node_id: crate::core::identifiers::NodeId,
    /// Canonical hash of the state before this step ran.
    #[serde(rename = "stateHashBefore")]
    pub state_hash_before: String,
    /// Canonical hash of this step's input.
    #[serde(rename = "inputHash")]
    pub input_hash: String,
    /// Canonical hash of this step's output.
    #[serde(rename = "outputHash")]
    pub output_hash: String,
    /// Canonical hash of the state after this step ran.
    #[serde(rename = "stateHashAfter")]
    pub state_hash_after: String,
    /// Edge key the node selected, or `None` when terminal.
    #[serde(rename = "nextEdge", skip_serializing_if = "Option::is_none")]
    pub next_edge: Option<String>,
    /// When the step began executing.
    #[serde(rename = "startedAt")]
    pub started_at: Timestamp,
    /// When the step finished executing.
    #[serde(rename = "finishedAt")]
    pub finished_at: Timestamp,
    /// Wall-clock duration of the step, in milliseconds.
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    /// The error that occurred while executing this step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

// ============================================================================
// SECTION: Activity Record
// ============================================================================

/// The kind of non-deterministic call an activity record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    /// `activity.now()`.
    Now,
    /// `activity.rand()`.
    Rand,
    /// `activity.httpRequest()`.
    Http,
    /// `activity.sendA2A()`.
    A2a,
    /// `activity.callMCP()`.
    Mcp,
    /// `activity.databaseQuery()`.
    Db,
    /// `activity.readArtifact()`.
    ReadArtifact,
    /// `activity.writeArtifact()`.
    WriteArtifact,
}

/// The recorded outcome of an activity call: either inline or spilled to
/// the blob store when above the configured size threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActivityPayload {
    /// Response data stored inline.
    Inline(Value),
    /// A handle to the response, stored in the blob store.
    Blob(ArtifactRef),
}

/// The durable record of a single non-deterministic call made from within
/// a node, keyed for idempotency and replay.
///
/// # Invariants
/// - `(traceId, stepIndex, activityType, requestHash)` is unique.
/// - Records for a given step are persisted in the order they were
///   requested by the node function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Run this activity belongs to.
    #[serde(rename = "traceId")]
    pub trace_id: TraceId,
    /// Step this activity was requested from.
    #[serde(rename = "stepIndex")]
    pub step_index: StepIndex,
    /// Kind of activity.
    #[serde(rename = "activityType")]
    pub activity_type: ActivityType,
    /// SHA-256 of the canonical JSON encoding of the request; the
    /// idempotency key across retries and the replay lookup key.
    #[serde(rename = "requestHash")]
    pub request_hash: String,
    /// The recorded response.
    pub response: ActivityPayload,
    /// When the call began.
    #[serde(rename = "startedAt")]
    pub started_at: Timestamp,
    /// When the call finished.
    #[serde(rename = "finishedAt")]
    pub finished_at: Timestamp,
    /// Wall-clock duration of the call, in milliseconds.
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    /// The error that occurred while performing this call, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use super::RunStatus;

    #[test]
    fn pending_may_transition_to_running() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn running_may_not_transition_to_pending() {
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Pending));
    }

    #[test]
    fn terminal_statuses_never_transition() {
        for terminal in [
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Timeout,
            RunStatus::Aborted,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(RunStatus::Running));
        }
    }

    #[test]
    fn running_may_transition_to_any_terminal_status() {
        for terminal in [
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Timeout,
            RunStatus::Aborted,
        ] {
            assert!(RunStatus::Running.can_transition_to(terminal));
        }
    }
}
