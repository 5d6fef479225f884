// crates/cmo-schema/tests/envelope_validation.rs
// ============================================================================
// Module: Envelope Validation Integration Tests
// Description: End-to-end schema-registry coverage of the envelope
//              validation boundary.
// Purpose: Exercise meta/payload validation and JSON-pointer reporting
//          through the public `SchemaRegistry` API only.
// ============================================================================

#![allow(clippy::unwrap_used, reason = "test-only assertions")]

use cmo_core::core::envelope::Envelope;
use cmo_core::core::envelope::EnvelopeMeta;
use cmo_core::core::identifiers::AgentId;
use cmo_core::core::identifiers::CorrelationId;
use cmo_core::core::identifiers::MessageType;
use cmo_core::core::time::Timestamp;
use cmo_core::error::SchemaError;
use cmo_schema::SchemaRegistry;
use serde_json::json;

fn meta(message_type: &str) -> EnvelopeMeta {
    EnvelopeMeta {
        a2a_version: "1.0".to_string(),
        correlation_id: CorrelationId::new("corr-envelope-tests"),
        trace_id: None,
        message_type: MessageType::new(message_type),
        timestamp: Timestamp::UnixMillis(0),
        from: AgentId::new("orchestrator"),
        to: vec![AgentId::new("specialist")],
        reply_to: None,
        priority: None,
        deadline: None,
        signature: None,
    }
}

fn specialist_result_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["status"],
        "properties": {"status": {"type": "string", "enum": ["ok", "error"]}}
    })
}

/// Scenario 5: an envelope whose payload is missing the required `status`
/// field is rejected with `PAYLOAD_SCHEMA_INVALID`, and `details` lists a
/// JSON pointer rooted at `/payload` naming the missing field.
#[test]
fn missing_required_field_reports_a_payload_rooted_pointer() {
    let mut registry = SchemaRegistry::with_default_meta_schema().unwrap();
    registry.register_payload_schema("SpecialistResult", &specialist_result_schema()).unwrap();

    let envelope = Envelope::new(meta("SpecialistResult"), json!({}));
    let outcome = registry.validate_envelope(&envelope);

    assert!(!outcome.valid);
    assert_eq!(outcome.error_code, Some("PAYLOAD_SCHEMA_INVALID"));
    assert!(
        outcome.errors.iter().any(|pointer| pointer == "/payload/status"),
        "expected a /payload/status pointer, got {:?}",
        outcome.errors
    );
}

/// A payload field that fails its own schema constraint (not a missing
/// field) is reported at its own `/payload/...` pointer, not the object
/// root.
#[test]
fn invalid_enum_value_reports_the_fields_own_pointer() {
    let mut registry = SchemaRegistry::with_default_meta_schema().unwrap();
    registry.register_payload_schema("SpecialistResult", &specialist_result_schema()).unwrap();

    let envelope = Envelope::new(meta("SpecialistResult"), json!({ "status": "not-a-real-status" }));
    let outcome = registry.validate_envelope(&envelope);

    assert!(!outcome.valid);
    assert_eq!(outcome.error_code, Some("PAYLOAD_SCHEMA_INVALID"));
    assert!(outcome.errors.iter().any(|pointer| pointer == "/payload/status"));
}

/// A well-formed envelope against a registered schema validates cleanly.
#[test]
fn valid_envelope_round_trips_through_validation() {
    let mut registry = SchemaRegistry::with_default_meta_schema().unwrap();
    registry.register_payload_schema("SpecialistResult", &specialist_result_schema()).unwrap();

    let envelope = Envelope::new(meta("SpecialistResult"), json!({ "status": "ok" }));
    let outcome = registry.validate_envelope(&envelope);

    assert!(outcome.valid);
    assert!(outcome.errors.is_empty());
    assert!(outcome.error_code.is_none());
}

/// An envelope whose `messageType` has no registered payload schema is
/// rejected before payload validation even runs.
#[test]
fn unregistered_message_type_is_rejected_before_payload_validation() {
    let registry = SchemaRegistry::with_default_meta_schema().unwrap();
    let envelope = Envelope::new(meta("NeverRegistered"), json!({ "status": "ok" }));
    let outcome = registry.validate_envelope(&envelope);

    assert_eq!(outcome.error_code, Some("UNKNOWN_MESSAGE_TYPE"));
}

/// An envelope with an empty `to` list fails meta validation, reporting a
/// pointer rooted at `/meta` rather than `/payload`.
#[test]
fn empty_recipients_list_fails_meta_validation_with_a_meta_rooted_pointer() {
    let registry = SchemaRegistry::with_default_meta_schema().unwrap();
    let mut bad_meta = meta("SpecialistResult");
    bad_meta.to = Vec::new();
    let envelope = Envelope::new(bad_meta, json!({}));

    let outcome = registry.validate_envelope(&envelope);
    assert_eq!(outcome.error_code, Some("META_SCHEMA_INVALID"));
    assert!(outcome.errors.iter().any(|pointer| pointer.starts_with("/meta")));
}

/// P5: `validate_envelope_or_throw` raises a structured [`SchemaError`]
/// carrying the same payload-rooted pointers as the non-throwing variant.
#[test]
fn validate_envelope_or_throw_carries_the_same_pointers() {
    let mut registry = SchemaRegistry::with_default_meta_schema().unwrap();
    registry.register_payload_schema("SpecialistResult", &specialist_result_schema()).unwrap();
    let envelope = Envelope::new(meta("SpecialistResult"), json!({}));

    let err = registry.validate_envelope_or_throw(&envelope).unwrap_err();
    match err {
        SchemaError::PayloadSchemaInvalid { pointers, .. } => {
            assert!(pointers.iter().any(|pointer| pointer == "/payload/status"));
        }
        other => panic!("expected PayloadSchemaInvalid, got {other:?}"),
    }
}
