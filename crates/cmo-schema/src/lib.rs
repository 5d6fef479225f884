// crates/cmo-schema/src/lib.rs
// ============================================================================
// Crate: cmo-schema
// Description: Envelope and payload schema validation against a registry
//              of JSON schemas keyed by `meta.messageType`.
// Purpose: A single function, `validate_envelope`, and one error taxonomy
//          (`META_SCHEMA_INVALID`, `PAYLOAD_SCHEMA_INVALID`,
//          `UNKNOWN_MESSAGE_TYPE`), applied before publish and on receive.
// Dependencies: cmo-core, jsonschema, serde_json
// ============================================================================

//! ## Overview
//! [`SchemaRegistry`] holds one compiled [`jsonschema::Validator`] for
//! `EnvelopeMeta` and one per registered `messageType`. Hot-loading is not
//! supported: schemas are registered once at startup, then the registry is
//! read-only for the lifetime of the process.

use std::collections::HashMap;

use cmo_core::core::envelope::Envelope;
use cmo_core::error::SchemaError;
use jsonschema::Draft;
use jsonschema::ValidationErrorKind;
use jsonschema::Validator;
use serde_json::Value;
use serde_json::json;

/// The result of [`SchemaRegistry::validate_envelope`].
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Whether both `meta` and `payload` validated successfully.
    pub valid: bool,
    /// The taxonomy error code, present when `valid` is `false`.
    pub error_code: Option<&'static str>,
    /// JSON-pointer paths to the offending fields, present on
    /// `PAYLOAD_SCHEMA_INVALID`.
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self {
            valid: true,
            error_code: None,
            errors: Vec::new(),
        }
    }
}

/// Returns the built-in JSON schema for `EnvelopeMeta`, matching the shape
/// of `cmo_core::core::envelope::EnvelopeMeta`.
#[must_use]
pub fn default_meta_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "additionalProperties": false,
        "required": ["a2aVersion", "correlationId", "messageType", "timestamp", "from", "to"],
        "properties": {
            "a2aVersion": {"type": "string", "minLength": 1},
            "correlationId": {"type": "string", "minLength": 1},
            "traceId": {"type": ["string", "null"]},
            "messageType": {"type": "string", "minLength": 1},
            "timestamp": {"type": "object"},
            "from": {"type": "string", "minLength": 1},
            "to": {"type": "array", "items": {"type": "string", "minLength": 1}, "minItems": 1},
            "replyTo": {"type": "string"},
            "priority": {"type": "string", "enum": ["high", "normal", "low"]},
            "deadline": {"type": "object"},
            "signature": {"type": "string"}
        }
    })
}

/// Maps `meta.messageType` to a compiled payload schema and validates
/// envelopes at every publish/receive boundary.
///
/// # Invariants
/// - Schemas are registered only at startup; no method mutates an already
///   compiled schema.
pub struct SchemaRegistry {
    meta_schema: Validator,
    payload_schemas: HashMap<String, Validator>,
}

impl SchemaRegistry {
    /// Builds a registry with the given meta schema and no payload schemas
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::MetaSchemaInvalid`] if `meta_schema` does not
    /// compile as a draft 2020-12 schema.
    pub fn new(meta_schema: &Value) -> Result<Self, SchemaError> {
        let compiled = compile(meta_schema).map_err(SchemaError::MetaSchemaInvalid)?;
        Ok(Self {
            meta_schema: compiled,
            payload_schemas: HashMap::new(),
        })
    }

    /// Builds a registry using [`default_meta_schema`] and no payload
    /// schemas registered.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::MetaSchemaInvalid`] only if the built-in
    /// schema itself fails to compile, which indicates a bug in this crate.
    pub fn with_default_meta_schema() -> Result<Self, SchemaError> {
        Self::new(&default_meta_schema())
    }

    /// Registers (or replaces) the payload schema for a message type.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::MetaSchemaInvalid`] if `schema` does not
    /// compile; this reuses the meta-schema variant since both are
    /// schema-compilation failures at startup, before any message flows.
    pub fn register_payload_schema(&mut self, message_type: impl Into<String>, schema: &Value) -> Result<(), SchemaError> {
        let compiled = compile(schema).map_err(SchemaError::MetaSchemaInvalid)?;
        self.payload_schemas.insert(message_type.into(), compiled);
        Ok(())
    }

    /// Validates `meta` first, then `payload` against the schema registered
    /// for `meta.messageType`.
    ///
    /// Returns a non-erroring [`ValidationOutcome`] describing the result;
    /// callers that want a `Result` should use
    /// [`SchemaRegistry::validate_envelope_or_throw`].
    #[must_use]
    pub fn validate_envelope(&self, envelope: &Envelope) -> ValidationOutcome {
        let meta_value = match serde_json::to_value(&envelope.meta) {
            Ok(value) => value,
            Err(err) => {
                return ValidationOutcome {
                    valid: false,
                    error_code: Some("META_SCHEMA_INVALID"),
                    errors: vec![err.to_string()],
                };
            }
        };
        if let Some(errors) = self.collect_errors("/meta", &self.meta_schema, &meta_value) {
            return ValidationOutcome {
                valid: false,
                error_code: Some("META_SCHEMA_INVALID"),
                errors,
            };
        }

        let message_type = envelope.meta.message_type.as_str();
        let Some(payload_schema) = self.payload_schemas.get(message_type) else {
            return ValidationOutcome {
                valid: false,
                error_code: Some("UNKNOWN_MESSAGE_TYPE"),
                errors: vec![message_type.to_string()],
            };
        };
        if let Some(errors) = self.collect_errors("/payload", payload_schema, &envelope.payload) {
            return ValidationOutcome {
                valid: false,
                error_code: Some("PAYLOAD_SCHEMA_INVALID"),
                errors,
            };
        }

        ValidationOutcome::ok()
    }

    /// Same as [`SchemaRegistry::validate_envelope`], but raises the
    /// structured [`SchemaError`] instead of returning an outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when validation fails, carrying the same
    /// taxonomy code and detail the non-throwing variant reports.
    pub fn validate_envelope_or_throw(&self, envelope: &Envelope) -> Result<(), SchemaError> {
        let outcome = self.validate_envelope(envelope);
        if outcome.valid {
            return Ok(());
        }
        match outcome.error_code {
            Some("UNKNOWN_MESSAGE_TYPE") => Err(SchemaError::UnknownMessageType(
                outcome.errors.first().cloned().unwrap_or_default(),
            )),
            Some("PAYLOAD_SCHEMA_INVALID") => Err(SchemaError::PayloadSchemaInvalid {
                pointers: outcome.errors,
                message: "payload failed schema validation".to_string(),
            }),
            _ => Err(SchemaError::MetaSchemaInvalid(outcome.errors.join("; "))),
        }
    }

    fn collect_errors(&self, root: &str, validator: &Validator, value: &Value) -> Option<Vec<String>> {
        let pointers: Vec<String> = validator
            .iter_errors(value)
            .map(|err| {
                // Errors are reported relative to `value` (`meta` or
                // `payload`), so every pointer is rooted at `root`. A
                // `required` violation is reported at the containing
                // object's path, not the missing property's, so the
                // property name is appended explicitly.
                let pointer = format!("{root}{}", err.instance_path);
                if let ValidationErrorKind::Required { property } = &err.kind {
                    let name = property.as_str().unwrap_or_default();
                    format!("{pointer}/{name}")
                } else {
                    pointer
                }
            })
            .collect();
        if pointers.is_empty() {
            None
        } else {
            Some(pointers)
        }
    }
}

fn compile(schema: &Value) -> Result<Validator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| err.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use cmo_core::core::envelope::Envelope;
    use cmo_core::core::envelope::EnvelopeMeta;
    use cmo_core::core::identifiers::AgentId;
    use cmo_core::core::identifiers::CorrelationId;
    use cmo_core::core::identifiers::MessageType;
    use cmo_core::core::time::Timestamp;
    use serde_json::json;

    use super::SchemaRegistry;

    fn sample_meta(message_type: &str) -> EnvelopeMeta {
        EnvelopeMeta {
            a2a_version: "1.0".to_string(),
            correlation_id: CorrelationId::new("corr-1"),
            trace_id: None,
            message_type: MessageType::new(message_type),
            timestamp: Timestamp::UnixMillis(0),
            from: AgentId::new("agent-a"),
            to: vec![AgentId::new("agent-b")],
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
            "properties": {"status": {"type": "string"}}
        })
    }

    #[test]
    fn valid_envelope_passes() {
        let mut registry = SchemaRegistry::with_default_meta_schema().unwrap();
        registry
            .register_payload_schema("SpecialistResult", &specialist_result_schema())
            .unwrap();
        let envelope = Envelope::new(sample_meta("SpecialistResult"), json!({"status": "ok"}));
        let outcome = registry.validate_envelope(&envelope);
        assert!(outcome.valid);
    }

    #[test]
    fn unknown_message_type_is_reported() {
        let registry = SchemaRegistry::with_default_meta_schema().unwrap();
        let envelope = Envelope::new(sample_meta("NeverRegistered"), json!({}));
        let outcome = registry.validate_envelope(&envelope);
        assert_eq!(outcome.error_code, Some("UNKNOWN_MESSAGE_TYPE"));
    }

    #[test]
    fn missing_required_payload_field_reports_json_pointer() {
        let mut registry = SchemaRegistry::with_default_meta_schema().unwrap();
        registry
            .register_payload_schema("SpecialistResult", &specialist_result_schema())
            .unwrap();
        let envelope = Envelope::new(sample_meta("SpecialistResult"), json!({}));
        let outcome = registry.validate_envelope(&envelope);
        assert_eq!(outcome.error_code, Some("PAYLOAD_SCHEMA_INVALID"));
        assert!(outcome.errors.iter().any(|pointer| pointer.contains("status")));
    }

    #[test]
    fn malformed_meta_is_reported_as_meta_schema_invalid() {
        let registry = SchemaRegistry::with_default_meta_schema().unwrap();
        let mut meta = sample_meta("SpecialistResult");
        meta.to = Vec::new();
        let envelope = Envelope::new(meta, json!({}));
        let outcome = registry.validate_envelope(&envelope);
        assert_eq!(outcome.error_code, Some("META_SCHEMA_INVALID"));
    }

    #[test]
    fn validate_envelope_or_throw_raises_structured_error() {
        let registry = SchemaRegistry::with_default_meta_schema().unwrap();
        let envelope = Envelope::new(sample_meta("NeverRegistered"), json!({}));
        let err = registry.validate_envelope_or_throw(&envelope).unwrap_err();
        assert!(matches!(err, cmo_core::error::SchemaError::UnknownMessageType(_)));
    }
}
