// crates/cmo-core/src/core/envelope.rs
// ============================================================================
// Module: Envelope
// Description: The meta+payload message shape exchanged over the transport.
// Purpose: Define the wire format validated at every publish/receive
//          boundary; payload schemas are registered and checked elsewhere
//          (`cmo-schema`), this module only fixes the envelope's shape.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! An envelope is always `{meta, payload}`. `meta` is validated against a
//! single fixed schema; `payload` is validated against whichever schema is
//! registered for `meta.messageType`. This module defines the known
//! built-in message types (`SpecialistInvocationRequest`, `SpecialistResult`,
//! `RetryDirective`, `DecisionNotice`) as typed payload shapes that callers
//! may convert to and from the envelope's untyped `payload` field.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::AgentId;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::MessageType;
use crate::core::identifiers::TraceId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Envelope Meta
// ============================================================================

/// Relative importance of a message, used by transports that support
/// priority queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Processed ahead of normal-priority messages where the backend
    /// supports it.
    High,
    /// Default priority.
    Normal,
    /// Processed after normal-priority messages where the backend
    /// supports it.
    Low,
}

/// The fixed envelope metadata block, validated against a single schema
/// regardless of `messageType`.
///
/// # Invariants
/// - `messageType` selects the schema used to validate `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    /// Wire protocol version.
    #[serde(rename = "a2aVersion")]
    pub a2a_version: String,
    /// Correlates a request envelope with its reply.
    #[serde(rename = "correlationId")]
    pub correlation_id: CorrelationId,
    /// The run this envelope belongs to, if any.
    #[serde(rename = "traceId")]
    pub trace_id: Option<TraceId>,
    /// Selects the payload schema.
    #[serde(rename = "messageType")]
    pub message_type: MessageType,
    /// When the envelope was created.
    pub timestamp: Timestamp,
    /// Sending agent.
    pub from: AgentId,
    /// Receiving agents.
    pub to: Vec<AgentId>,
    /// Topic to publish a reply to, if a reply is expected.
    #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Relative delivery priority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Latest timestamp by which the envelope should be handled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Timestamp>,
    /// HMAC over a canonical serialization of `meta` minus this field,
    /// keyed by a configured secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Maximum payload size accepted by the transport, in bytes, unless
/// configuration overrides it.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// A structured message with a fixed metadata block and a type-selected
/// payload.
///
/// # Invariants
/// - `meta` must validate against `EnvelopeMeta`.
/// - `payload` must validate against the schema registered for
///   `meta.messageType`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Fixed metadata block.
    pub meta: EnvelopeMeta,
    /// Type-selected payload body.
    pub payload: Value,
}

impl Envelope {
    /// Builds an envelope from typed metadata and an arbitrary payload
    /// value.
    #[must_use]
    pub fn new(meta: EnvelopeMeta, payload: Value) -> Self {
        Self { meta, payload }
    }
}

// ============================================================================
// SECTION: Built-in Payload Types
// ============================================================================

/// Requests that a specialist agent perform a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistInvocationRequest {
    /// Name of the task to perform.
    pub task: String,
    /// Task-specific arguments.
    pub arguments: Value,
}

/// The outcome of a specialist invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistResult {
    /// Terminal status of the invocation.
    pub status: String,
    /// Result payload, present when `status` indicates success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error detail, present when `status` indicates failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Instructs a sender to retry a prior request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDirective {
    /// Correlation id of the request to retry.
    #[serde(rename = "correlationId")]
    pub correlation_id: CorrelationId,
    /// Suggested delay before retrying, in milliseconds.
    #[serde(rename = "retryAfterMs")]
    pub retry_after_ms: u64,
    /// Human-readable reason for the retry.
    pub reason: String,
}

/// Notifies interested parties of a decision made elsewhere in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionNotice {
    /// The decision that was made.
    pub decision: String,
    /// Free-form supporting detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use serde_json::json;

    use super::Envelope;
    use super::EnvelopeMeta;
    use super::Priority;
    use super::SpecialistResult;
    use crate::core::identifiers::AgentId;
    use crate::core::identifiers::CorrelationId;
    use crate::core::identifiers::MessageType;
    use crate::core::time::Timestamp;

    fn sample_meta() -> EnvelopeMeta {
        EnvelopeMeta {
            a2a_version: "1.0".to_string(),
            correlation_id: CorrelationId::new("corr-1"),
            trace_id: None,
            message_type: MessageType::new("SpecialistResult"),
            timestamp: Timestamp::UnixMillis(0),
            from: AgentId::new("agent-a"),
            to: vec![AgentId::new("agent-b")],
            reply_to: None,
            priority: Some(Priority::Normal),
            deadline: None,
            signature: None,
        }
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let payload = SpecialistResult {
            status: "ok".to_string(),
            result: Some(json!({"value": 1})),
            error: None,
        };
        let envelope = Envelope::new(sample_meta(), serde_json::to_value(payload).unwrap());
        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.meta.message_type.as_str(), "SpecialistResult");
        assert_eq!(decoded.payload["status"], json!("ok"));
    }

    #[test]
    fn optional_meta_fields_are_omitted_when_absent() {
        let mut meta = sample_meta();
        meta.priority = None;
        let envelope = Envelope::new(meta, json!({}));
        let encoded = serde_json::to_string(&envelope).unwrap();
        assert!(!encoded.contains("priority"));
    }
}
