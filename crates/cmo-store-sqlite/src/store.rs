// crates/cmo-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Checkpoint Store
// Description: Durable CheckpointStore backed by SQLite WAL.
// Purpose: Persist runs, step records, and activity records with
//          idempotent writes and divergence detection on conflicting
//          content.
// Dependencies: cmo-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements [`cmo_core::interfaces::CheckpointStore`] using
//! `SQLite`. Every persisted value that isn't already a plain string is
//! stored as its canonical `serde_json` text so a single column type
//! (`TEXT`) carries timestamps, statuses, activity payloads, and error
//! detail alike. Divergence checks compare the freshly computed row
//! against whatever is already stored at the same key before deciding
//! whether a write is a no-op, an error, or a genuine insert.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use cmo_core::core::identifiers::GraphId;
use cmo_core::core::identifiers::GraphVersion;
use cmo_core::core::identifiers::NodeId;
use cmo_core::core::identifiers::StepIndex;
use cmo_core::core::identifiers::TraceId;
use cmo_core::core::run::ActivityPayload;
use cmo_core::core::run::ActivityRecord;
use cmo_core::core::run::ActivityType;
use cmo_core::core::run::Run;
use cmo_core::core::run::RunStatus;
use cmo_core::core::run::StepRecord;
use cmo_core::error::StoreError;
use cmo_core::interfaces::ArtifactRef;
use cmo_core::interfaces::CheckpointStore;
use cmo_core::interfaces::HealthStatus;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` checkpoint store.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// `SQLite` sync mode.
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Builds a config pointing at `path` with default timeout and sync
    /// mode settings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store contains data that does not decode as the expected type.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// A write conflicted with an existing record of different content.
    #[error("checkpoint divergence at ({trace_id}, {step_index}): {detail}")]
    Divergence {
        /// The run whose checkpoint diverged.
        trace_id: String,
        /// The step index at which divergence was detected.
        step_index: u64,
        /// Description of the mismatch.
        detail: String,
    },
    /// An attempted run status transition was not monotonic.
    #[error("invalid run status transition: {from:?} -> {to:?}")]
    InvalidStatusTransition {
        /// Prior status.
        from: RunStatus,
        /// Attempted next status.
        to: RunStatus,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => Self::StoreUnavailable(message),
            SqliteStoreError::Corrupt(message) => Self::StoreUnavailable(format!("store corruption: {message}")),
            SqliteStoreError::Divergence {
                trace_id,
                step_index,
                detail,
            } => Self::CheckpointDivergence {
                trace_id,
                step_index,
                detail,
            },
            SqliteStoreError::InvalidStatusTransition { from, to } => Self::InvalidStatusTransition {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
            },
        }
    }
}

fn db_err(err: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed checkpoint store with WAL support.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Opens a checkpoint store, creating the database file and schema if
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Opens an in-memory store, primarily for tests.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the in-memory database cannot be
    /// initialized.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let mut connection = Connection::open_in_memory().map_err(db_err)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("connection mutex poisoned".to_string()))
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn initialize(&self) -> Result<(), StoreError> {
        // Schema is created eagerly in `open`/`open_in_memory`; calling this
        // again is a no-op, matching the trait's idempotency contract.
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .execute_batch("SELECT 1;")
            .map_err(db_err)
            .map_err(StoreError::from)
    }

    fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        self.save_run_inner(run).map_err(StoreError::from)
    }

    fn get_run(&self, trace_id: &TraceId) -> Result<Option<Run>, StoreError> {
        self.get_run_inner(trace_id).map_err(StoreError::from)
    }

    fn list_runs(&self) -> Result<Vec<TraceId>, StoreError> {
        self.list_runs_inner().map_err(StoreError::from)
    }

    fn update_run_status(&self, trace_id: &TraceId, status: RunStatus, error: Option<Value>) -> Result<(), StoreError> {
        self.update_run_status_inner(trace_id, status, error).map_err(StoreError::from)
    }

    fn save_step(&self, step: &StepRecord) -> Result<(), StoreError> {
        self.save_step_inner(step).map_err(StoreError::from)
    }

    fn get_last_step(&self, trace_id: &TraceId) -> Result<Option<StepRecord>, StoreError> {
        self.get_last_step_inner(trace_id).map_err(StoreError::from)
    }

    fn get_all_steps(&self, trace_id: &TraceId) -> Result<Vec<StepRecord>, StoreError> {
        self.get_all_steps_inner(trace_id).map_err(StoreError::from)
    }

    fn save_activity(&self, record: &ActivityRecord) -> Result<(), StoreError> {
        self.save_activity_inner(record).map_err(StoreError::from)
    }

    fn get_activity(
        &self,
        trace_id: &TraceId,
        step_index: StepIndex,
        activity_type: ActivityType,
        request_hash: &str,
    ) -> Result<Option<ActivityRecord>, StoreError> {
        self.get_activity_inner(trace_id, step_index, activity_type, request_hash)
            .map_err(StoreError::from)
    }

    fn get_activities_for_step(&self, trace_id: &TraceId, step_index: StepIndex) -> Result<Vec<ActivityRecord>, StoreError> {
        self.get_activities_for_step_inner(trace_id, step_index).map_err(StoreError::from)
    }

    fn health_check(&self) -> Result<HealthStatus, StoreError> {
        let started = Instant::now();
        let guard = self.lock().map_err(StoreError::from)?;
        let healthy = guard.execute_batch("SELECT 1;").is_ok();
        drop(guard);
        Ok(HealthStatus {
            healthy,
            latency: started.elapsed(),
        })
    }

    fn close(&self) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(db_err)
            .map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Run operations
// ============================================================================

impl SqliteCheckpointStore {
    fn save_run_inner(&self, run: &Run) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO runs (trace_id, graph_id, graph_version, status, started_at, finished_at, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(trace_id) DO UPDATE SET
                    graph_id = excluded.graph_id,
                    graph_version = excluded.graph_version,
                    status = excluded.status,
                    started_at = excluded.started_at,
                    finished_at = excluded.finished_at,
                    error = excluded.error",
                params![
                    run.trace_id.as_str(),
                    run.graph_id.as_str(),
                    run.graph_version.as_str(),
                    to_json(&run.status)?,
                    to_json(&run.started_at)?,
                    run.finished_at.as_ref().map(to_json).transpose()?,
                    run.error.as_ref().map(to_json).transpose()?,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn update_run_status_inner(&self, trace_id: &TraceId, status: RunStatus, error: Option<Value>) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        let current: Option<String> = guard
            .query_row("SELECT status FROM runs WHERE trace_id = ?1", params![trace_id.as_str()], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        let Some(current) = current else {
            return Err(SqliteStoreError::Corrupt(format!("no run found for trace_id {}", trace_id.as_str())));
        };
        let current_status: RunStatus = from_json(&current)?;
        if !current_status.can_transition_to(status) {
            return Err(SqliteStoreError::InvalidStatusTransition {
                from: current_status,
                to: status,
            });
        }
        guard
            .execute(
                "UPDATE runs SET status = ?1, error = ?2 WHERE trace_id = ?3",
                params![to_json(&status)?, error.as_ref().map(to_json).transpose()?, trace_id.as_str()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn get_run_inner(&self, trace_id: &TraceId) -> Result<Option<Run>, SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                "SELECT graph_id, graph_version, status, started_at, finished_at, error
                 FROM runs WHERE trace_id = ?1",
                params![trace_id.as_str()],
                |row| row_to_run(trace_id, row),
            )
            .optional()
            .map_err(db_err)?
            .transpose()
    }

    fn list_runs_inner(&self) -> Result<Vec<TraceId>, SqliteStoreError> {
        // `started_at` is a fixed virtual-clock baseline shared by every run
        // (see `RUN_CLOCK_BASELINE`), so it carries no ordering information;
        // `rowid` reflects insertion order instead.
        let guard = self.lock()?;
        let mut statement = guard.prepare("SELECT trace_id FROM runs ORDER BY rowid DESC").map_err(db_err)?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<String>, rusqlite::Error>>()
            .map_err(db_err)?;
        Ok(rows.into_iter().map(TraceId::new).collect())
    }
}

fn row_to_run(trace_id: &TraceId, row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let graph_id: String = row.get(0)?;
    let graph_version: String = row.get(1)?;
    let status: String = row.get(2)?;
    let started_at: String = row.get(3)?;
    let finished_at: Option<String> = row.get(4)?;
    let error: Option<String> = row.get(5)?;
    run_columns_to_record(trace_id, graph_id, graph_version, status, started_at, finished_at, error).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })
}

#[allow(clippy::too_many_arguments, reason = "mirrors the flat row shape of the runs table")]
fn run_columns_to_record(
    trace_id: &TraceId,
    graph_id: String,
    graph_version: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    error: Option<String>,
) -> Result<Run, SqliteStoreError> {
    Ok(Run {
        trace_id: trace_id.clone(),
        graph_id: GraphId::new(graph_id),
        graph_version: GraphVersion::new(graph_version),
        status: from_json(&status)?,
        started_at: from_json(&started_at)?,
        finished_at: finished_at.as_deref().map(from_json).transpose()?,
        error: error.as_deref().map(from_json).transpose()?,
    })
}

// ============================================================================
// SECTION: Step operations
// ============================================================================

impl SqliteCheckpointStore {
    fn save_step_inner(&self, step: &StepRecord) -> Result<(), SqliteStoreError> {
        let step_index = i64::try_from(step.step_index.get()).map_err(|_| SqliteStoreError::Corrupt("step index out of range".to_string()))?;
        let guard = self.lock()?;
        let existing = guard
            .query_row(
                "SELECT node_id, state_hash_before, input_hash, output_hash, state_hash_after, next_edge,
                        started_at, finished_at, duration_ms, error
                 FROM steps WHERE trace_id = ?1 AND step_index = ?2",
                params![step.trace_id.as_str(), step_index],
                row_to_step_columns,
            )
            .optional()
            .map_err(db_err)?;

        let incoming = step_columns_from_record(step)?;
        if let Some(existing) = existing {
            if existing == incoming {
                return Ok(());
            }
            return Err(SqliteStoreError::Divergence {
                trace_id: step.trace_id.as_str().to_string(),
                step_index: step.step_index.get(),
                detail: "step record conflicts with an already persisted step".to_string(),
            });
        }

        guard
            .execute(
                "INSERT INTO steps (
                    trace_id, step_index, node_id, state_hash_before, input_hash, output_hash,
                    state_hash_after, next_edge, started_at, finished_at, duration_ms, error
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    step.trace_id.as_str(),
                    step_index,
                    step.node_id.as_str(),
                    incoming.state_hash_before,
                    incoming.input_hash,
                    incoming.output_hash,
                    incoming.state_hash_after,
                    incoming.next_edge,
                    incoming.started_at,
                    incoming.finished_at,
                    incoming.duration_ms,
                    incoming.error,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn get_last_step_inner(&self, trace_id: &TraceId) -> Result<Option<StepRecord>, SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                "SELECT step_index, node_id, state_hash_before, input_hash, output_hash, state_hash_after,
                        next_edge, started_at, finished_at, duration_ms, error
                 FROM steps WHERE trace_id = ?1 ORDER BY step_index DESC LIMIT 1",
                params![trace_id.as_str()],
                |row| row_to_step_record(trace_id, row),
            )
            .optional()
            .map_err(db_err)?
            .transpose()
    }

    fn get_all_steps_inner(&self, trace_id: &TraceId) -> Result<Vec<StepRecord>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT step_index, node_id, state_hash_before, input_hash, output_hash, state_hash_after,
                        next_edge, started_at, finished_at, duration_ms, error
                 FROM steps WHERE trace_id = ?1 ORDER BY step_index ASC",
            )
            .map_err(db_err)?;
        let rows = statement
            .query_map(params![trace_id.as_str()], |row| row_to_step_record(trace_id, row))
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, rusqlite::Error>>().map_err(db_err)?.into_iter().collect()
    }
}

#[derive(Debug, PartialEq, Eq)]
struct StepColumns {
    node_id: String,
    state_hash_before: String,
    input_hash: String,
    output_hash: String,
    state_hash_after: String,
    next_edge: Option<String>,
    started_at: String,
    finished_at: String,
    duration_ms: i64,
    error: Option<String>,
}

fn step_columns_from_record(step: &StepRecord) -> Result<StepColumns, SqliteStoreError> {
    Ok(StepColumns {
        node_id: step.node_id.as_str().to_string(),
        state_hash_before: step.state_hash_before.clone(),
        input_hash: step.input_hash.clone(),
        output_hash: step.output_hash.clone(),
        state_hash_after: step.state_hash_after.clone(),
        next_edge: step.next_edge.clone(),
        started_at: to_json(&step.started_at)?,
        finished_at: to_json(&step.finished_at)?,
        duration_ms: i64::try_from(step.duration_ms).map_err(|_| SqliteStoreError::Corrupt("duration out of range".to_string()))?,
        error: step.error.as_ref().map(to_json).transpose()?,
    })
}

fn row_to_step_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<StepColumns> {
    Ok(StepColumns {
        node_id: row.get(0)?,
        state_hash_before: row.get(1)?,
        input_hash: row.get(2)?,
        output_hash: row.get(3)?,
        state_hash_after: row.get(4)?,
        next_edge: row.get(5)?,
        started_at: row.get(6)?,
        finished_at: row.get(7)?,
        duration_ms: row.get(8)?,
        error: row.get(9)?,
    })
}

fn row_to_step_record(trace_id: &TraceId, row: &rusqlite::Row<'_>) -> rusqlite::Result<StepRecord> {
    let step_index: i64 = row.get(0)?;
    let columns = StepColumns {
        node_id: row.get(1)?,
        state_hash_before: row.get(2)?,
        input_hash: row.get(3)?,
        output_hash: row.get(4)?,
        state_hash_after: row.get(5)?,
        next_edge: row.get(6)?,
        started_at: row.get(7)?,
        finished_at: row.get(8)?,
        duration_ms: row.get(9)?,
        error: row.get(10)?,
    };
    step_columns_to_record(trace_id, step_index, columns).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn step_columns_to_record(trace_id: &TraceId, step_index: i64, columns: StepColumns) -> Result<StepRecord, SqliteStoreError> {
    let step_index = u64::try_from(step_index).map_err(|_| SqliteStoreError::Corrupt("negative step index".to_string()))?;
    Ok(StepRecord {
        trace_id: trace_id.clone(),
        step_index: StepIndex::new(step_index),
        node_id: NodeId::new(columns.node_id),
        state_hash_before: columns.state_hash_before,
        input_hash: columns.input_hash,
        output_hash: columns.output_hash,
        state_hash_after: columns.state_hash_after,
        next_edge: columns.next_edge,
        started_at: from_json(&columns.started_at)?,
        finished_at: from_json(&columns.finished_at)?,
        duration_ms: u64::try_from(columns.duration_ms).map_err(|_| SqliteStoreError::Corrupt("negative duration".to_string()))?,
        error: columns.error.as_deref().map(from_json).transpose()?,
    })
}

// ============================================================================
// SECTION: Activity operations
// ============================================================================

impl SqliteCheckpointStore {
    fn save_activity_inner(&self, record: &ActivityRecord) -> Result<(), SqliteStoreError> {
        let step_index = i64::try_from(record.step_index.get()).map_err(|_| SqliteStoreError::Corrupt("step index out of range".to_string()))?;
        let activity_type = to_json(&record.activity_type)?;
        let guard = self.lock()?;
        let incoming = activity_columns_from_record(record)?;

        // `requestHash` is the idempotency key across retries (spec 4.2):
        // unlike `saveStep`, a conflicting re-save is not divergence, it is
        // the normal shape of "attempt failed, attempt succeeded" under the
        // same key. Upsert rather than reject.
        guard
            .execute(
                "INSERT INTO activities (
                    trace_id, step_index, activity_type, request_hash, response_data, blob_ref,
                    started_at, finished_at, duration_ms, error
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(trace_id, step_index, activity_type, request_hash) DO UPDATE SET
                    response_data = excluded.response_data,
                    blob_ref = excluded.blob_ref,
                    started_at = excluded.started_at,
                    finished_at = excluded.finished_at,
                    duration_ms = excluded.duration_ms,
                    error = excluded.error",
                params![
                    record.trace_id.as_str(),
                    step_index,
                    activity_type,
                    record.request_hash,
                    incoming.response_data,
                    incoming.blob_ref,
                    incoming.started_at,
                    incoming.finished_at,
                    incoming.duration_ms,
                    incoming.error,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn get_activity_inner(
        &self,
        trace_id: &TraceId,
        step_index: StepIndex,
        activity_type: ActivityType,
        request_hash: &str,
    ) -> Result<Option<ActivityRecord>, SqliteStoreError> {
        let step_index_value = i64::try_from(step_index.get()).map_err(|_| SqliteStoreError::Corrupt("step index out of range".to_string()))?;
        let activity_type_json = to_json(&activity_type)?;
        let guard = self.lock()?;
        guard
            .query_row(
                "SELECT response_data, blob_ref, started_at, finished_at, duration_ms, error
                 FROM activities WHERE trace_id = ?1 AND step_index = ?2 AND activity_type = ?3 AND request_hash = ?4",
                params![trace_id.as_str(), step_index_value, activity_type_json, request_hash],
                row_to_activity_columns,
            )
            .optional()
            .map_err(db_err)?
            .map(|columns| activity_columns_to_record(trace_id, step_index, activity_type, request_hash, columns))
            .transpose()
    }

    fn get_activities_for_step_inner(&self, trace_id: &TraceId, step_index: StepIndex) -> Result<Vec<ActivityRecord>, SqliteStoreError> {
        let step_index_value = i64::try_from(step_index.get()).map_err(|_| SqliteStoreError::Corrupt("step index out of range".to_string()))?;
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT activity_type, request_hash, response_data, blob_ref, started_at, finished_at, duration_ms, error
                 FROM activities WHERE trace_id = ?1 AND step_index = ?2 ORDER BY id ASC",
            )
            .map_err(db_err)?;
        let rows = statement
            .query_map(params![trace_id.as_str(), step_index_value], |row| {
                let activity_type_json: String = row.get(0)?;
                let request_hash: String = row.get(1)?;
                let columns = ActivityColumns {
                    response_data: row.get(2)?,
                    blob_ref: row.get(3)?,
                    started_at: row.get(4)?,
                    finished_at: row.get(5)?,
                    duration_ms: row.get(6)?,
                    error: row.get(7)?,
                };
                Ok((activity_type_json, request_hash, columns))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, rusqlite::Error>>()
            .map_err(db_err)?;
        rows.into_iter()
            .map(|(activity_type_json, request_hash, columns)| {
                let activity_type: ActivityType = from_json(&activity_type_json)?;
                activity_columns_to_record(trace_id, step_index, activity_type, &request_hash, columns)
            })
            .collect()
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ActivityColumns {
    response_data: Option<String>,
    blob_ref: Option<String>,
    started_at: String,
    finished_at: String,
    duration_ms: i64,
    error: Option<String>,
}

fn activity_columns_from_record(record: &ActivityRecord) -> Result<ActivityColumns, SqliteStoreError> {
    let (response_data, blob_ref) = match &record.response {
        ActivityPayload::Inline(value) => (Some(serde_json::to_string(value).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?), None),
        ActivityPayload::Blob(artifact) => (None, Some(artifact.handle.clone())),
    };
    Ok(ActivityColumns {
        response_data,
        blob_ref,
        started_at: to_json(&record.started_at)?,
        finished_at: to_json(&record.finished_at)?,
        duration_ms: i64::try_from(record.duration_ms).map_err(|_| SqliteStoreError::Corrupt("duration out of range".to_string()))?,
        error: record.error.as_ref().map(to_json).transpose()?,
    })
}

fn row_to_activity_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityColumns> {
    Ok(ActivityColumns {
        response_data: row.get(0)?,
        blob_ref: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        duration_ms: row.get(4)?,
        error: row.get(5)?,
    })
}

fn activity_columns_to_record(
    trace_id: &TraceId,
    step_index: StepIndex,
    activity_type: ActivityType,
    request_hash: &str,
    columns: ActivityColumns,
) -> Result<ActivityRecord, SqliteStoreError> {
    let response = match (columns.response_data, columns.blob_ref) {
        (Some(data), None) => {
            ActivityPayload::Inline(serde_json::from_str(&data).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?)
        }
        (None, Some(handle)) => ActivityPayload::Blob(ArtifactRef { handle }),
        _ => return Err(SqliteStoreError::Corrupt("activity row has neither or both of response_data/blob_ref".to_string())),
    };
    Ok(ActivityRecord {
        trace_id: trace_id.clone(),
        step_index,
        activity_type,
        request_hash: request_hash.to_string(),
        response,
        started_at: from_json(&columns.started_at)?,
        finished_at: from_json(&columns.finished_at)?,
        duration_ms: u64::try_from(columns.duration_ms).map_err(|_| SqliteStoreError::Corrupt("negative duration".to_string()))?,
        error: columns.error.as_deref().map(from_json).transpose()?,
    })
}

// ============================================================================
// SECTION: JSON helpers
// ============================================================================

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, SqliteStoreError> {
    serde_json::to_string(value).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

fn from_json<T: for<'de> serde::Deserialize<'de>>(text: &str) -> Result<T, SqliteStoreError> {
    serde_json::from_str(text).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

// ============================================================================
// SECTION: Connection setup
// ============================================================================

fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_err)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_err)?;
    connection.execute_batch("PRAGMA journal_mode = wal;").map_err(db_err)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_err)?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_err)?;
    Ok(())
}

fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_err)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);").map_err(db_err)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_err)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION]).map_err(db_err)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS runs (
                    trace_id TEXT PRIMARY KEY,
                    graph_id TEXT NOT NULL,
                    graph_version TEXT NOT NULL,
                    status TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    finished_at TEXT,
                    error TEXT
                );
                CREATE TABLE IF NOT EXISTS steps (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    trace_id TEXT NOT NULL REFERENCES runs(trace_id) ON DELETE CASCADE,
                    step_index INTEGER NOT NULL,
                    node_id TEXT NOT NULL,
                    state_hash_before TEXT NOT NULL,
                    input_hash TEXT NOT NULL,
                    output_hash TEXT NOT NULL,
                    state_hash_after TEXT NOT NULL,
                    next_edge TEXT,
                    started_at TEXT NOT NULL,
                    finished_at TEXT NOT NULL,
                    duration_ms INTEGER NOT NULL,
                    error TEXT,
                    UNIQUE(trace_id, step_index)
                );
                CREATE INDEX IF NOT EXISTS idx_steps_trace_id ON steps (trace_id, step_index);
                CREATE TABLE IF NOT EXISTS activities (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    trace_id TEXT NOT NULL,
                    step_index INTEGER NOT NULL,
                    activity_type TEXT NOT NULL,
                    request_hash TEXT NOT NULL,
                    response_data TEXT,
                    blob_ref TEXT,
                    started_at TEXT NOT NULL,
                    finished_at TEXT NOT NULL,
                    duration_ms INTEGER NOT NULL,
                    error TEXT,
                    UNIQUE(trace_id, step_index, activity_type, request_hash),
                    FOREIGN KEY (trace_id, step_index) REFERENCES steps(trace_id, step_index)
                );
                CREATE INDEX IF NOT EXISTS idx_activities_step ON activities (trace_id, step_index);",
            )
            .map_err(db_err)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::Corrupt(format!("unsupported schema version: {value}")));
        }
    }
    tx.commit().map_err(db_err)?;
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use cmo_core::core::identifiers::GraphId;
    use cmo_core::core::identifiers::GraphVersion;
    use cmo_core::core::identifiers::NodeId;
    use cmo_core::core::identifiers::StepIndex;
    use cmo_core::core::identifiers::TraceId;
    use cmo_core::core::run::ActivityPayload;
    use cmo_core::core::run::ActivityRecord;
    use cmo_core::core::run::ActivityType;
    use cmo_core::core::run::Run;
    use cmo_core::core::run::RunStatus;
    use cmo_core::core::run::StepRecord;
    use cmo_core::core::time::Timestamp;
    use cmo_core::interfaces::CheckpointStore;
    use serde_json::json;

    use super::SqliteCheckpointStore;

    fn sample_run(trace_id: &str) -> Run {
        Run {
            trace_id: TraceId::new(trace_id),
            graph_id: GraphId::new("graph-a"),
            graph_version: GraphVersion::new("1"),
            status: RunStatus::Pending,
            started_at: Timestamp::UnixMillis(0),
            finished_at: None,
            error: None,
        }
    }

    fn sample_step(trace_id: &str, step_index: u64) -> StepRecord {
        StepRecord {
            trace_id: TraceId::new(trace_id),
            step_index: StepIndex::new(step_index),
            node_id: NodeId::new("node-a"),
            state_hash_before: "before".to_string(),
            input_hash: "input".to_string(),
            output_hash: "output".to_string(),
            state_hash_after: "after".to_string(),
            next_edge: Some("default".to_string()),
            started_at: Timestamp::UnixMillis(0),
            finished_at: Timestamp::UnixMillis(1),
            duration_ms: 1,
            error: None,
        }
    }

    fn sample_activity(trace_id: &str, step_index: u64) -> ActivityRecord {
        ActivityRecord {
            trace_id: TraceId::new(trace_id),
            step_index: StepIndex::new(step_index),
            activity_type: ActivityType::Now,
            request_hash: "hash-a".to_string(),
            response: ActivityPayload::Inline(json!({"now": 0})),
            started_at: Timestamp::UnixMillis(0),
            finished_at: Timestamp::UnixMillis(1),
            duration_ms: 1,
            error: None,
        }
    }

    #[test]
    fn save_and_load_run_round_trips() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let run = sample_run("trace-1");
        store.save_run(&run).unwrap();
        store.update_run_status(&run.trace_id, RunStatus::Running, None).unwrap();
        let health = store.health_check().unwrap();
        assert!(health.healthy);
    }

    #[test]
    fn get_run_reflects_latest_status() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let run = sample_run("trace-run-1");
        store.save_run(&run).unwrap();
        store.update_run_status(&run.trace_id, RunStatus::Running, None).unwrap();
        let fetched = store.get_run(&run.trace_id).unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Running);
        assert_eq!(fetched.graph_id, run.graph_id);
    }

    #[test]
    fn get_run_returns_none_for_unknown_trace() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        assert!(store.get_run(&TraceId::new("missing")).unwrap().is_none());
    }

    #[test]
    fn invalid_status_transition_is_rejected() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let run = sample_run("trace-2");
        store.save_run(&run).unwrap();
        store.update_run_status(&run.trace_id, RunStatus::Completed, None).unwrap();
        let err = store.update_run_status(&run.trace_id, RunStatus::Running, None).unwrap_err();
        assert!(matches!(err, cmo_core::error::StoreError::InvalidStatusTransition { .. }));
    }

    #[test]
    fn save_step_is_idempotent_on_identical_content() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let run = sample_run("trace-3");
        store.save_run(&run).unwrap();
        let step = sample_step("trace-3", 0);
        store.save_step(&step).unwrap();
        store.save_step(&step).unwrap();
        let steps = store.get_all_steps(&run.trace_id).unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn save_step_detects_divergence() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let run = sample_run("trace-4");
        store.save_run(&run).unwrap();
        let step = sample_step("trace-4", 0);
        store.save_step(&step).unwrap();
        let mut diverged = sample_step("trace-4", 0);
        diverged.output_hash = "different".to_string();
        let err = store.save_step(&diverged).unwrap_err();
        assert!(matches!(err, cmo_core::error::StoreError::CheckpointDivergence { .. }));
    }

    #[test]
    fn get_last_step_returns_highest_index() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let run = sample_run("trace-5");
        store.save_run(&run).unwrap();
        store.save_step(&sample_step("trace-5", 0)).unwrap();
        store.save_step(&sample_step("trace-5", 1)).unwrap();
        let last = store.get_last_step(&run.trace_id).unwrap().unwrap();
        assert_eq!(last.step_index.get(), 1);
    }

    #[test]
    fn activity_round_trips_inline_payload() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let run = sample_run("trace-6");
        store.save_run(&run).unwrap();
        store.save_step(&sample_step("trace-6", 0)).unwrap();
        let activity = sample_activity("trace-6", 0);
        store.save_activity(&activity).unwrap();
        let fetched = store
            .get_activity(&run.trace_id, StepIndex::new(0), ActivityType::Now, "hash-a")
            .unwrap()
            .unwrap();
        assert!(matches!(fetched.response, ActivityPayload::Inline(_)));
    }

    #[test]
    fn activity_save_is_idempotent_and_detects_divergence() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let run = sample_run("trace-7");
        store.save_run(&run).unwrap();
        store.save_step(&sample_step("trace-7", 0)).unwrap();
        let activity = sample_activity("trace-7", 0);
        store.save_activity(&activity).unwrap();
        store.save_activity(&activity).unwrap();

        let mut diverged = sample_activity("trace-7", 0);
        diverged.response = ActivityPayload::Inline(json!({"now": 999}));
        let err = store.save_activity(&diverged).unwrap_err();
        assert!(matches!(err, cmo_core::error::StoreError::CheckpointDivergence { .. }));
    }

    #[test]
    fn get_activities_for_step_preserves_insertion_order() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let run = sample_run("trace-8");
        store.save_run(&run).unwrap();
        store.save_step(&sample_step("trace-8", 0)).unwrap();
        let mut first = sample_activity("trace-8", 0);
        first.request_hash = "hash-1".to_string();
        let mut second = sample_activity("trace-8", 0);
        second.request_hash = "hash-2".to_string();
        store.save_activity(&first).unwrap();
        store.save_activity(&second).unwrap();
        let activities = store.get_activities_for_step(&run.trace_id, StepIndex::new(0)).unwrap();
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].request_hash, "hash-1");
        assert_eq!(activities[1].request_hash, "hash-2");
    }
}
