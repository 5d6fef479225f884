// crates/cmo-config/src/schema.rs
// ============================================================================
// Module: Config JSON Schema
// Description: Emits a JSON Schema (draft 2020-12) describing the shape
//              `EngineConfig` deserializes, for editor tooling and docs.
// Purpose: Keep one hand-authored schema in lockstep with `config.rs`,
//          self-checked at call time so a drifted schema fails loudly
//          instead of silently describing the wrong shape.
// Dependencies: jsonschema, serde_json
// ============================================================================

use jsonschema::Draft;
use serde_json::Value;
use serde_json::json;

/// Errors raised while building or self-checking the configuration schema.
#[derive(Debug, thiserror::Error)]
pub enum ConfigSchemaError {
    /// The generated schema document is not itself a valid JSON Schema.
    #[error("config schema is not a valid draft 2020-12 schema: {0}")]
    MetaSchemaInvalid(String),
}

/// Returns the JSON Schema (draft 2020-12) describing the `EngineConfig`
/// TOML shape, expressed as a JSON document (TOML and JSON share a data
/// model for the purposes of schema validation here).
///
/// # Errors
///
/// Returns [`ConfigSchemaError`] if the emitted document fails to compile
/// as a draft 2020-12 schema; this indicates a bug in this function, not in
/// caller input.
pub fn config_schema() -> Result<Value, ConfigSchemaError> {
    let schema = json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://cmo.internal/schemas/engine-config.json",
        "title": "EngineConfig",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "database": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "host": {"type": "string", "minLength": 1},
                    "port": {"type": "integer", "minimum": 1, "maximum": 65535},
                    "name": {"type": "string"},
                    "user": {"type": "string"},
                    "password": {"type": "string"},
                    "ssl": {"type": "boolean"},
                    "pool_size": {"type": "integer", "minimum": 1}
                }
            },
            "transport": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "host": {"type": "string", "minLength": 1},
                    "port": {"type": "integer", "minimum": 1, "maximum": 65535},
                    "stream": {"type": "string"},
                    "group": {"type": "string", "minLength": 1}
                }
            },
            "blob_store": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "endpoint": {"type": "string"},
                    "credentials": {"type": "string"},
                    "bucket": {"type": "string"},
                    "path_style": {"type": "boolean"}
                }
            },
            "observability": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "enabled": {"type": "boolean"},
                    "service_name": {"type": "string", "minLength": 1},
                    "exporter_endpoint": {"type": "string"},
                    "sample_rate": {"type": "number", "minimum": 0.0, "maximum": 1.0}
                }
            },
            "policy": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "enabled": {"type": "boolean"},
                    "bundle_path": {"type": "string"}
                }
            },
            "logging": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "level": {"type": "string", "minLength": 1},
                    "pretty": {"type": "boolean"}
                }
            },
            "runtime": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "per_node_timeout_ms": {"type": "integer", "minimum": 1},
                    "whole_run_timeout_ms": {"type": "integer", "minimum": 1},
                    "checkpoint_every_n_steps": {"type": "integer", "minimum": 1},
                    "max_retries_per_node": {"type": "integer", "minimum": 0},
                    "replay_payload_size_threshold_bytes": {"type": "integer", "minimum": 0}
                }
            }
        }
    });

    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| ConfigSchemaError::MetaSchemaInvalid(err.to_string()))?;

    Ok(schema)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use super::config_schema;

    #[test]
    fn config_schema_self_checks() {
        assert!(config_schema().is_ok());
    }

    #[test]
    fn config_schema_accepts_a_minimal_instance() {
        let schema = config_schema().unwrap();
        let validator = jsonschema::options()
            .with_draft(jsonschema::Draft::Draft202012)
            .build(&schema)
            .unwrap();
        assert!(validator.is_valid(&serde_json::json!({
            "database": {"host": "localhost", "pool_size": 5},
        })));
    }

    #[test]
    fn config_schema_rejects_unknown_top_level_keys() {
        let schema = config_schema().unwrap();
        let validator = jsonschema::options()
            .with_draft(jsonschema::Draft::Draft202012)
            .build(&schema)
            .unwrap();
        assert!(!validator.is_valid(&serde_json::json!({"not_a_real_section": {}})));
    }
}
