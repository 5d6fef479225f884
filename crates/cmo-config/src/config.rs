// crates/cmo-config/src/config.rs
// ============================================================================
// Module: Engine Configuration
// Description: The `database`/`transport`/`blobStore`/`observability`/
//              `policy`/`logging`/`runtime` sections recognized at startup.
// Purpose: Load, override from environment, and validate the configuration
//          shape fixed by the engine's data model.
// Dependencies: serde, thiserror, toml
// ============================================================================

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Environment variable naming the config file to load when no path is
/// given explicitly.
pub const CONFIG_ENV_VAR: &str = "CMO_CONFIG";

/// Default config file name, resolved relative to the working directory.
pub const DEFAULT_CONFIG_NAME: &str = "cmo.toml";

/// Configuration files larger than this are rejected before parsing.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;

const fn default_db_port() -> u16 {
    5432
}

const fn default_db_pool_size() -> u32 {
    10
}

const fn default_transport_port() -> u16 {
    6379
}

fn default_transport_group() -> String {
    "cmo-runtime".to_string()
}

const fn default_sample_rate() -> f64 {
    0.1
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_per_node_timeout_ms() -> u64 {
    30_000
}

const fn default_whole_run_timeout_ms() -> u64 {
    600_000
}

const fn default_checkpoint_every_n_steps() -> u32 {
    1
}

const fn default_max_retries_per_node() -> u32 {
    0
}

const fn default_replay_payload_size_threshold_bytes() -> usize {
    256 * 1024
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading the configuration file.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A value failed validation; the message names the offending field.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for cmo_core::error::LifecycleError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigInvalid(err.to_string())
    }
}

// ============================================================================
// SECTION: Database
// ============================================================================

/// Connection settings for the checkpoint store's backing datastore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Hostname or address.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port.
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// Database or schema name.
    #[serde(default)]
    pub name: String,
    /// Connecting user.
    #[serde(default)]
    pub user: String,
    /// Connecting password; redacted in `Debug` and logs.
    #[serde(default)]
    pub password: String,
    /// Whether to require TLS.
    #[serde(default)]
    pub ssl: bool,
    /// Maximum size of the connection pool.
    #[serde(default = "default_db_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_db_port(),
            name: String::new(),
            user: String::new(),
            password: String::new(),
            ssl: false,
            pool_size: default_db_pool_size(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

impl DatabaseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("database.host must be non-empty".to_string()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("database.poolSize must be greater than zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Connection settings for the message transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Hostname or address.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port.
    #[serde(default = "default_transport_port")]
    pub port: u16,
    /// Stream or subject namespace, e.g. `qa.<tenant>.<project>`.
    #[serde(default)]
    pub stream: String,
    /// Default consumer group name for this process.
    #[serde(default = "default_transport_group")]
    pub group: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_transport_port(),
            stream: String::new(),
            group: default_transport_group(),
        }
    }
}

impl TransportConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("transport.host must be non-empty".to_string()));
        }
        if self.group.trim().is_empty() {
            return Err(ConfigError::Invalid("transport.group must be non-empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Blob Store
// ============================================================================

/// Connection settings for the S3-compatible blob store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BlobStoreConfig {
    /// Object-store endpoint URL.
    #[serde(default)]
    pub endpoint: String,
    /// Access credentials; redacted in `Debug` and logs.
    #[serde(default)]
    pub credentials: String,
    /// Target bucket name.
    #[serde(default)]
    pub bucket: String,
    /// Whether to use path-style addressing instead of virtual-hosted.
    #[serde(default)]
    pub path_style: bool,
}

impl BlobStoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint.is_empty() && !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid(
                "blobStore.endpoint must include http:// or https://".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Observability
// ============================================================================

/// Tracing/metrics export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Whether to initialize the exporter at startup.
    #[serde(default)]
    pub enabled: bool,
    /// Service name attached to emitted spans.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Exporter endpoint, required when `enabled`.
    #[serde(default)]
    pub exporter_endpoint: String,
    /// Fraction of spans sampled, in `[0.0, 1.0]`.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

fn default_service_name() -> String {
    "cmo-elg".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: default_service_name(),
            exporter_endpoint: String::new(),
            sample_rate: default_sample_rate(),
        }
    }
}

impl ObservabilityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid("observability.sampleRate must be in [0.0, 1.0]".to_string()));
        }
        if self.enabled && self.exporter_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "observability.exporterEndpoint must be set when observability.enabled".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Policy evaluator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    /// Whether the policy gates are enforced.
    #[serde(default)]
    pub enabled: bool,
    /// Path to the compiled WebAssembly policy bundle.
    #[serde(default)]
    pub bundle_path: String,
}

impl PolicyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.bundle_path.trim().is_empty() {
            return Err(ConfigError::Invalid("policy.bundlePath must be set when policy.enabled".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Structured logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `"info"` or `"cmo_runtime=debug"`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit human-readable (non-JSON) log lines.
    #[serde(default)]
    pub pretty: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            pretty: false,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level must be non-empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Runtime
// ============================================================================

/// Runtime executor tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum wall-clock time a single node invocation may run.
    #[serde(default = "default_per_node_timeout_ms")]
    pub per_node_timeout_ms: u64,
    /// Maximum wall-clock time a single run may take end-to-end.
    #[serde(default = "default_whole_run_timeout_ms")]
    pub whole_run_timeout_ms: u64,
    /// Checkpoint cadence; `1` checkpoints every step.
    #[serde(default = "default_checkpoint_every_n_steps")]
    pub checkpoint_every_n_steps: u32,
    /// Default maximum retries applied when a node has no explicit policy.
    #[serde(default = "default_max_retries_per_node")]
    pub max_retries_per_node: u32,
    /// Activity payloads at or above this size are spilled to the blob store.
    #[serde(default = "default_replay_payload_size_threshold_bytes")]
    pub replay_payload_size_threshold_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            per_node_timeout_ms: default_per_node_timeout_ms(),
            whole_run_timeout_ms: default_whole_run_timeout_ms(),
            checkpoint_every_n_steps: default_checkpoint_every_n_steps(),
            max_retries_per_node: default_max_retries_per_node(),
            replay_payload_size_threshold_bytes: default_replay_payload_size_threshold_bytes(),
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.per_node_timeout_ms == 0 {
            return Err(ConfigError::Invalid("runtime.perNodeTimeoutMs must be greater than zero".to_string()));
        }
        if self.whole_run_timeout_ms == 0 {
            return Err(ConfigError::Invalid("runtime.wholeRunTimeoutMs must be greater than zero".to_string()));
        }
        if self.whole_run_timeout_ms < self.per_node_timeout_ms {
            return Err(ConfigError::Invalid(
                "runtime.wholeRunTimeoutMs must be >= runtime.perNodeTimeoutMs".to_string(),
            ));
        }
        if self.checkpoint_every_n_steps == 0 {
            return Err(ConfigError::Invalid("runtime.checkpointEveryNSteps must be greater than zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Engine Configuration
// ============================================================================

/// The complete set of options recognized at startup.
///
/// # Invariants
/// - Immutable once [`EngineConfig::load`] returns; nothing mutates it for
///   the lifetime of the process.
/// - Secret-like fields (`database.password`, `blobStore.credentials`) are
///   never written out by [`fmt::Debug`].
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Checkpoint store backing datastore settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Message transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Blob store settings.
    #[serde(default)]
    pub blob_store: BlobStoreConfig,
    /// Tracing/metrics export settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Policy evaluator settings.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Structured logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Runtime executor tunables.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("database.host", &self.database.host)
            .field("database.port", &self.database.port)
            .field("database.name", &self.database.name)
            .field("database.password", &"<redacted>")
            .field("transport", &self.transport)
            .field("blobStore.endpoint", &self.blob_store.endpoint)
            .field("blobStore.credentials", &"<redacted>")
            .field("observability", &self.observability)
            .field("policy", &self.policy)
            .field("logging", &self.logging)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl EngineConfig {
    /// Loads configuration from disk, applies environment overrides, and
    /// validates the result.
    ///
    /// Resolution order for the file path: `path`, then `$CMO_CONFIG`, then
    /// [`DEFAULT_CONFIG_NAME`] in the working directory. A missing default
    /// file is not an error — the process falls back to defaults overridden
    /// by environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or
    /// when validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let mut config = match resolved {
            Some(resolved) => Self::from_file(&resolved)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Overrides fields from recognized environment variables. Unknown
    /// variables are silently ignored; malformed values are left for
    /// [`EngineConfig::validate`] to reject structurally where possible, or
    /// are rejected here when they cannot even be parsed to the target type.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string("CMO_DATABASE_HOST") {
            self.database.host = v;
        }
        if let Some(v) = env_parsed::<u16>("CMO_DATABASE_PORT") {
            self.database.port = v;
        }
        if let Some(v) = env_string("CMO_DATABASE_NAME") {
            self.database.name = v;
        }
        if let Some(v) = env_string("CMO_DATABASE_USER") {
            self.database.user = v;
        }
        if let Some(v) = env_string("CMO_DATABASE_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = env_bool("CMO_DATABASE_SSL") {
            self.database.ssl = v;
        }
        if let Some(v) = env_parsed::<u32>("CMO_DATABASE_POOL_SIZE") {
            self.database.pool_size = v;
        }
        if let Some(v) = env_string("CMO_TRANSPORT_HOST") {
            self.transport.host = v;
        }
        if let Some(v) = env_parsed::<u16>("CMO_TRANSPORT_PORT") {
            self.transport.port = v;
        }
        if let Some(v) = env_string("CMO_TRANSPORT_STREAM") {
            self.transport.stream = v;
        }
        if let Some(v) = env_string("CMO_TRANSPORT_GROUP") {
            self.transport.group = v;
        }
        if let Some(v) = env_string("CMO_BLOB_STORE_ENDPOINT") {
            self.blob_store.endpoint = v;
        }
        if let Some(v) = env_string("CMO_BLOB_STORE_CREDENTIALS") {
            self.blob_store.credentials = v;
        }
        if let Some(v) = env_string("CMO_BLOB_STORE_BUCKET") {
            self.blob_store.bucket = v;
        }
        if let Some(v) = env_bool("CMO_BLOB_STORE_PATH_STYLE") {
            self.blob_store.path_style = v;
        }
        if let Some(v) = env_bool("CMO_OBSERVABILITY_ENABLED") {
            self.observability.enabled = v;
        }
        if let Some(v) = env_string("CMO_OBSERVABILITY_ENDPOINT") {
            self.observability.exporter_endpoint = v;
        }
        if let Some(v) = env_parsed::<f64>("CMO_OBSERVABILITY_SAMPLE_RATE") {
            self.observability.sample_rate = v;
        }
        if let Some(v) = env_bool("CMO_POLICY_ENABLED") {
            self.policy.enabled = v;
        }
        if let Some(v) = env_string("CMO_POLICY_BUNDLE_PATH") {
            self.policy.bundle_path = v;
        }
        if let Some(v) = env_string("CMO_LOGGING_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_bool("CMO_LOGGING_PRETTY") {
            self.logging.pretty = v;
        }
        if let Some(v) = env_parsed::<u64>("CMO_RUNTIME_PER_NODE_TIMEOUT_MS") {
            self.runtime.per_node_timeout_ms = v;
        }
        if let Some(v) = env_parsed::<u64>("CMO_RUNTIME_WHOLE_RUN_TIMEOUT_MS") {
            self.runtime.whole_run_timeout_ms = v;
        }
        if let Some(v) = env_parsed::<u32>("CMO_RUNTIME_CHECKPOINT_EVERY_N_STEPS") {
            self.runtime.checkpoint_every_n_steps = v;
        }
        if let Some(v) = env_parsed::<u32>("CMO_RUNTIME_MAX_RETRIES_PER_NODE") {
            self.runtime.max_retries_per_node = v;
        }
        if let Some(v) = env_parsed::<usize>("CMO_RUNTIME_REPLAY_PAYLOAD_SIZE_THRESHOLD_BYTES") {
            self.runtime.replay_payload_size_threshold_bytes = v;
        }
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.transport.validate()?;
        self.blob_store.validate()?;
        self.observability.validate()?;
        self.policy.validate()?;
        self.logging.validate()?;
        self.runtime.validate()?;
        Ok(())
    }
}

fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(env_path));
    }
    let default_path = PathBuf::from(DEFAULT_CONFIG_NAME);
    if default_path.exists() {
        return Some(default_path);
    }
    None
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use std::io::Write;

    use super::ConfigError;
    use super::EngineConfig;

    #[test]
    fn default_config_validates() {
        let mut config = EngineConfig::default();
        config.database.name = "cmo".to_string();
        config.transport.stream = "qa.default".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let mut config = EngineConfig::default();
        config.database.pool_size = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref message) if message.contains("poolSize")));
    }

    #[test]
    fn whole_run_timeout_must_not_be_shorter_than_per_node() {
        let mut config = EngineConfig::default();
        config.runtime.whole_run_timeout_ms = 1;
        config.runtime.per_node_timeout_ms = 2;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref message) if message.contains("wholeRunTimeoutMs")));
    }

    #[test]
    fn policy_enabled_requires_bundle_path() {
        let mut config = EngineConfig::default();
        config.policy.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref message) if message.contains("bundlePath")));
    }

    #[test]
    fn observability_enabled_requires_endpoint() {
        let mut config = EngineConfig::default();
        config.observability.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref message) if message.contains("exporterEndpoint")));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = EngineConfig::default();
        config.database.password = "hunter2".to_string();
        config.blob_store.credentials = "secret-key".to_string();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn load_from_file_applies_toml_and_then_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [database]
            host = "db.internal"
            name = "cmo"

            [transport]
            stream = "qa.acme.suite"
            "#
        )
        .unwrap();
        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.transport.stream, "qa.acme.suite");
    }

    #[test]
    fn oversized_config_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let filler = "# ".to_string() + &"x".repeat(super::MAX_CONFIG_FILE_SIZE + 1);
        writeln!(file, "{filler}").unwrap();
        let err = EngineConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
