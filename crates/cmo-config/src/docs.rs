// crates/cmo-config/src/docs.rs
// ============================================================================
// Module: Config Artifacts
// Description: Generates a starter TOML file and reference markdown for the
//              configuration shape.
// Purpose: Keep operator-facing documentation generated from, rather than
//          hand-copied from, the structs in `config.rs`.
// Dependencies: none beyond std
// ============================================================================

/// Returns a commented starter `cmo.toml` reflecting the default values of
/// every section.
#[must_use]
pub fn config_toml_example() -> String {
    r#"# cmo.toml — starter configuration for the CMO/ELG engine.
# Every field below may also be set via the CMO_* environment variables
# documented in `config_docs_markdown()`; environment values take
# precedence over this file.

[database]
host = "localhost"
port = 5432
name = "cmo"
user = "cmo"
# password = ""        # prefer CMO_DATABASE_PASSWORD over committing this
ssl = false
pool_size = 10

[transport]
host = "localhost"
port = 6379
stream = "qa.acme.suite"
group = "cmo-runtime"

[blob_store]
endpoint = "https://blob.internal"
# credentials = ""     # prefer CMO_BLOB_STORE_CREDENTIALS
bucket = "cmo-artifacts"
path_style = false

[observability]
enabled = false
service_name = "cmo-elg"
exporter_endpoint = ""
sample_rate = 0.1

[policy]
enabled = false
bundle_path = ""

[logging]
level = "info"
pretty = false

[runtime]
per_node_timeout_ms = 30000
whole_run_timeout_ms = 600000
checkpoint_every_n_steps = 1
max_retries_per_node = 0
replay_payload_size_threshold_bytes = 262144
"#
    .to_string()
}

/// Returns reference documentation (markdown) for every recognized
/// configuration field and its environment variable override.
#[must_use]
pub fn config_docs_markdown() -> String {
    let mut out = String::from("# CMO/ELG Configuration Reference\n\n");
    out.push_str(
        "Every field is settable in `cmo.toml` and overridable by the listed\n\
         environment variable. Unknown environment variables are ignored;\n\
         malformed values fail startup with a structured `CONFIG_INVALID` error.\n\n",
    );
    let sections: &[(&str, &[(&str, &str, &str)])] = &[
        (
            "database",
            &[
                ("host", "CMO_DATABASE_HOST", "Checkpoint store datastore hostname."),
                ("port", "CMO_DATABASE_PORT", "TCP port."),
                ("name", "CMO_DATABASE_NAME", "Database name."),
                ("user", "CMO_DATABASE_USER", "Connecting user."),
                ("password", "CMO_DATABASE_PASSWORD", "Connecting password. Never logged."),
                ("ssl", "CMO_DATABASE_SSL", "Require TLS (`true`/`false`)."),
                ("pool_size", "CMO_DATABASE_POOL_SIZE", "Max connections in the pool."),
            ],
        ),
        (
            "transport",
            &[
                ("host", "CMO_TRANSPORT_HOST", "Transport hostname."),
                ("port", "CMO_TRANSPORT_PORT", "TCP port."),
                ("stream", "CMO_TRANSPORT_STREAM", "Stream/subject namespace."),
                ("group", "CMO_TRANSPORT_GROUP", "Default consumer group name."),
            ],
        ),
        (
            "blob_store",
            &[
                ("endpoint", "CMO_BLOB_STORE_ENDPOINT", "Object store endpoint URL."),
                ("credentials", "CMO_BLOB_STORE_CREDENTIALS", "Access credentials. Never logged."),
                ("bucket", "CMO_BLOB_STORE_BUCKET", "Target bucket name."),
                ("path_style", "CMO_BLOB_STORE_PATH_STYLE", "Use path-style addressing."),
            ],
        ),
        (
            "observability",
            &[
                ("enabled", "CMO_OBSERVABILITY_ENABLED", "Initialize the exporter at startup."),
                ("exporter_endpoint", "CMO_OBSERVABILITY_ENDPOINT", "Exporter endpoint."),
                ("sample_rate", "CMO_OBSERVABILITY_SAMPLE_RATE", "Fraction of spans sampled."),
            ],
        ),
        (
            "policy",
            &[
                ("enabled", "CMO_POLICY_ENABLED", "Enforce policy gates."),
                ("bundle_path", "CMO_POLICY_BUNDLE_PATH", "Path to the compiled WASM policy bundle."),
            ],
        ),
        (
            "logging",
            &[
                ("level", "CMO_LOGGING_LEVEL", "`tracing` filter directive."),
                ("pretty", "CMO_LOGGING_PRETTY", "Human-readable (non-JSON) log lines."),
            ],
        ),
        (
            "runtime",
            &[
                ("per_node_timeout_ms", "CMO_RUNTIME_PER_NODE_TIMEOUT_MS", "Per-node deadline."),
                ("whole_run_timeout_ms", "CMO_RUNTIME_WHOLE_RUN_TIMEOUT_MS", "Whole-run deadline."),
                (
                    "checkpoint_every_n_steps",
                    "CMO_RUNTIME_CHECKPOINT_EVERY_N_STEPS",
                    "Checkpoint cadence.",
                ),
                (
                    "max_retries_per_node",
                    "CMO_RUNTIME_MAX_RETRIES_PER_NODE",
                    "Default retry budget for nodes without an explicit policy.",
                ),
                (
                    "replay_payload_size_threshold_bytes",
                    "CMO_RUNTIME_REPLAY_PAYLOAD_SIZE_THRESHOLD_BYTES",
                    "Activity payloads at or above this size spill to the blob store.",
                ),
            ],
        ),
    ];
    for (section, fields) in sections {
        out.push_str(&format!("## `[{section}]`\n\n"));
        out.push_str("| Field | Environment variable | Description |\n|---|---|---|\n");
        for (field, env_var, description) in *fields {
            out.push_str(&format!("| `{field}` | `{env_var}` | {description} |\n"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use super::config_docs_markdown;
    use super::config_toml_example;

    #[test]
    fn toml_example_parses_as_engine_config() {
        let parsed: crate::config::EngineConfig = toml::from_str(&config_toml_example()).unwrap();
        assert_eq!(parsed.database.name, "cmo");
    }

    #[test]
    fn docs_markdown_mentions_every_section() {
        let docs = config_docs_markdown();
        for section in ["database", "transport", "blob_store", "observability", "policy", "logging", "runtime"] {
            assert!(docs.contains(section), "missing section {section}");
        }
    }
}
