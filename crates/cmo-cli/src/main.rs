// crates/cmo-cli/src/main.rs
// ============================================================================
// Module: CMO/ELG CLI Entry Point
// Description: Command dispatcher for config validation, store health, and
//              offline replay/compare of persisted runs.
// Purpose: A generic operator-facing binary with no graph compiled in; the
//          replay subcommand offers the graph-free structural check
//          documented in `cmo_replay`, not full node re-execution.
// Dependencies: clap, cmo-config, cmo-core, cmo-policy, cmo-replay,
//               cmo-store-sqlite, serde_json, thiserror, tracing,
//               tracing-subscriber
// ============================================================================

//! ## Overview
//! `cmo` has three subcommands: `config validate` loads and validates an
//! `EngineConfig`; `health` probes the checkpoint store (and, if a policy
//! bundle path is configured, loads it) the way the app lifecycle's startup
//! sequence does; `replay` re-derives what it can about a persisted trace
//! without the graph that produced it — step contiguity, the
//! `stateHashBefore`/`stateHashAfter` chain, and (with `--compare`) a
//! step-by-step diff against a second trace. A host application that links
//! its graph can get full hash re-verification from `cmo_replay::replay`
//! directly; this binary cannot, because a `Graph` owns `Arc<dyn NodeLogic>`
//! closures that only the defining application holds.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use cmo_config::EngineConfig;
use cmo_core::core::identifiers::PolicyBundleId;
use cmo_core::core::identifiers::StepIndex;
use cmo_core::core::identifiers::TraceId;
use cmo_core::interfaces::CheckpointStore;
use cmo_core::interfaces::PolicyEvaluator;
use cmo_policy::WasmPolicyEvaluator;
use cmo_policy::wasm::WasmPolicyLimits;
use cmo_replay::CompareReport;
use cmo_replay::ReplayToolError;
use cmo_replay::StructuralCheckOptions;
use cmo_replay::StructuralReport;
use cmo_store_sqlite::SqliteCheckpointStore;
use cmo_store_sqlite::SqliteStoreConfig;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Default path of the reference `SQLite` checkpoint store, relative to the
/// working directory.
const DEFAULT_STORE_PATH: &str = "cmo.sqlite3";

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "cmo", about = "CMO/ELG engine operator CLI", disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Probes the checkpoint store (and policy bundle, if configured).
    Health(HealthArgs),
    /// Structural check and comparison of persisted traces.
    Replay(ReplayArgs),
    /// Read-only inspection of the checkpoint store.
    Store {
        /// Selected store subcommand.
        #[command(subcommand)]
        command: StoreCommand,
    },
}

/// Store subcommands.
#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Lists every trace id known to the checkpoint store.
    List(StoreListArgs),
    /// Prints the persisted `Run` record for one trace.
    Get(StoreGetArgs),
}

/// Arguments for `store list`.
#[derive(Args, Debug)]
struct StoreListArgs {
    /// Path to the `SQLite` checkpoint store to read from.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STORE_PATH)]
    store_path: PathBuf,
}

/// Arguments for `store get`.
#[derive(Args, Debug)]
struct StoreGetArgs {
    /// Trace identifier to fetch.
    #[arg(long, value_name = "ID")]
    trace: String,
    /// Path to the `SQLite` checkpoint store to read from.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STORE_PATH)]
    store_path: PathBuf,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Loads and validates a configuration file.
    Validate(ConfigValidateArgs),
}

/// Arguments for `config validate`.
#[derive(Args, Debug)]
struct ConfigValidateArgs {
    /// Path to a `cmo.toml` configuration file (defaults to `CMO_CONFIG` or
    /// `cmo.toml` in the working directory).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for `health`.
#[derive(Args, Debug)]
struct HealthArgs {
    /// Path to a `cmo.toml` configuration file, used only to discover a
    /// configured policy bundle path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Path to the `SQLite` checkpoint store to probe.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STORE_PATH)]
    store_path: PathBuf,
}

/// Arguments for `replay`.
#[derive(Args, Debug)]
struct ReplayArgs {
    /// Trace identifier to check (required).
    #[arg(long, value_name = "ID")]
    trace: String,
    /// Check only up to and including this step index.
    #[arg(long, value_name = "STEP")]
    to: Option<u64>,
    /// Recompute and compare the `stepIndex`/`stateHashBefore` chain,
    /// failing with `REPLAY_DIVERGENCE` on the first mismatch. Without
    /// this flag the command only lists the persisted steps.
    #[arg(long, action = ArgAction::SetTrue)]
    verify: bool,
    /// Compare `--trace` against this second trace id, step-by-step.
    #[arg(long, value_name = "ID")]
    compare: Option<String>,
    /// Print per-step detail rather than only the summary.
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
    /// Path to the `SQLite` checkpoint store to read from.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STORE_PATH)]
    store_path: PathBuf,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying the structured `{code, message}` reason
/// printed to stderr.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
struct CliError {
    /// Stable error code from the engine's taxonomy.
    code: &'static str,
    /// Human-readable message.
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<cmo_config::ConfigError> for CliError {
    fn from(err: cmo_config::ConfigError) -> Self {
        Self::new("CONFIG_INVALID", err.to_string())
    }
}

impl From<cmo_store_sqlite::SqliteStoreError> for CliError {
    fn from(err: cmo_store_sqlite::SqliteStoreError) -> Self {
        Self::new("STORE_UNAVAILABLE", err.to_string())
    }
}

impl From<cmo_core::error::StoreError> for CliError {
    fn from(err: cmo_core::error::StoreError) -> Self {
        Self::new("STORE_UNAVAILABLE", err.to_string())
    }
}

impl From<ReplayToolError> for CliError {
    fn from(err: ReplayToolError) -> Self {
        let code = match &err {
            ReplayToolError::RunNotFound(_) => "RUN_NOT_FOUND",
            ReplayToolError::GraphMismatch { .. } => "GRAPH_MISMATCH",
            ReplayToolError::Replay(inner) => match inner {
                cmo_core::error::ReplayError::ReplayRecordMissing { .. } => "REPLAY_RECORD_MISSING",
                cmo_core::error::ReplayError::ResumeDivergence { .. } => "RESUME_DIVERGENCE",
                cmo_core::error::ReplayError::ReplayDivergence { .. } => "REPLAY_DIVERGENCE",
            },
            ReplayToolError::Store(_) => "STORE_UNAVAILABLE",
        };
        Self::new(code, err.to_string())
    }
}

type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).with_target(false).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let reason = serde_json::json!({ "code": err.code, "message": err.message });
            eprintln!("{reason}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Config {
            command: ConfigCommand::Validate(args),
        } => command_config_validate(&args),
        Commands::Health(args) => command_health(&args),
        Commands::Replay(args) => command_replay(&args),
        Commands::Store {
            command: StoreCommand::List(args),
        } => command_store_list(&args),
        Commands::Store {
            command: StoreCommand::Get(args),
        } => command_store_get(&args),
    }
}

// ============================================================================
// SECTION: config validate
// ============================================================================

fn command_config_validate(args: &ConfigValidateArgs) -> CliResult<()> {
    let config = EngineConfig::load(args.config.as_deref())?;
    println!("{}", serde_json::json!({ "valid": true, "transport.stream": config.transport.stream, "database.name": config.database.name }));
    Ok(())
}

// ============================================================================
// SECTION: health
// ============================================================================

fn command_health(args: &HealthArgs) -> CliResult<()> {
    let config = EngineConfig::load(args.config.as_deref())?;

    let store_config = SqliteStoreConfig::new(args.store_path.clone());
    let store = SqliteCheckpointStore::open(&store_config)?;
    let store_health = store.health_check()?;

    let mut report = serde_json::json!({
        "store": {
            "healthy": store_health.healthy,
            "latencyMs": store_health.latency.as_millis(),
        },
    });

    if config.policy.enabled {
        let mut evaluator = WasmPolicyEvaluator::new(WasmPolicyLimits::default());
        let bundle_id = PolicyBundleId::new("health-check");
        match evaluator.initialize(&bundle_id, &config.policy.bundle_path) {
            Ok(()) => {
                report["policy"] = serde_json::json!({ "healthy": true });
            }
            Err(err) => {
                return Err(CliError::new("INIT_FAILED", format!("policy bundle load failed: {err}")));
            }
        }
    }

    println!("{report}");
    if !store_health.healthy {
        return Err(CliError::new("STORE_UNAVAILABLE", "checkpoint store health probe failed"));
    }
    Ok(())
}

// ============================================================================
// SECTION: replay
// ============================================================================

fn command_replay(args: &ReplayArgs) -> CliResult<()> {
    let store_config = SqliteStoreConfig::new(args.store_path.clone());
    let store = SqliteCheckpointStore::open(&store_config)?;
    let trace_id = TraceId::new(args.trace.clone());

    let options = StructuralCheckOptions {
        to_step: args.to.map(StepIndex::new),
        verbose: args.verbose,
    };
    let report = if args.verify {
        cmo_replay::structural_check(&store, &trace_id, &options)?
    } else {
        list_steps_without_verifying(&store, &trace_id, &options)?
    };
    print_structural_report(&report);

    if let Some(compare_trace) = &args.compare {
        let compare_id = TraceId::new(compare_trace.clone());
        let compare_report = cmo_replay::compare_traces(&store, &trace_id, &compare_id)?;
        print_compare_report(&compare_report);
        if !compare_report.divergences.is_empty() {
            return Err(CliError::new("REPLAY_DIVERGENCE", format!("{} trace(s) diverged from {compare_trace}", compare_report.divergences.len())));
        }
    }

    Ok(())
}

// ============================================================================
// SECTION: store list / store get
// ============================================================================

fn command_store_list(args: &StoreListArgs) -> CliResult<()> {
    let store_config = SqliteStoreConfig::new(args.store_path.clone());
    let store = SqliteCheckpointStore::open(&store_config)?;
    let trace_ids = store.list_runs()?;
    let rendered = serde_json::json!({
        "traceIds": trace_ids.iter().map(TraceId::as_str).collect::<Vec<_>>(),
    });
    println!("{rendered}");
    Ok(())
}

fn command_store_get(args: &StoreGetArgs) -> CliResult<()> {
    let store_config = SqliteStoreConfig::new(args.store_path.clone());
    let store = SqliteCheckpointStore::open(&store_config)?;
    let trace_id = TraceId::new(args.trace.clone());
    let run = store.get_run(&trace_id)?.ok_or_else(|| CliError::new("RUN_NOT_FOUND", format!("no run persisted for trace {}", trace_id.as_str())))?;
    let rendered = serde_json::json!({
        "traceId": run.trace_id.as_str(),
        "graphId": run.graph_id.as_str(),
        "graphVersion": run.graph_version.as_str(),
        "status": run.status,
        "startedAt": run.started_at,
        "finishedAt": run.finished_at,
        "error": run.error.map(|detail| serde_json::json!({ "code": detail.code, "message": detail.message })),
    });
    println!("{rendered}");
    Ok(())
}

/// Lists persisted steps without enforcing chain contiguity; used when
/// `--verify` is not passed.
fn list_steps_without_verifying(store: &dyn CheckpointStore, trace_id: &TraceId, options: &StructuralCheckOptions) -> Result<StructuralReport, ReplayToolError> {
    store.get_run(trace_id).map_err(ReplayToolError::Store)?.ok_or_else(|| ReplayToolError::RunNotFound(trace_id.clone()))?;
    let all_steps = store.get_all_steps(trace_id).map_err(ReplayToolError::Store)?;
    let steps = match options.to_step {
        Some(limit) => all_steps.into_iter().take_while(|step| step.step_index.get() <= limit.get()).collect(),
        None => all_steps,
    };
    let steps_checked = steps.len();
    let detail = if options.verbose {
        steps
            .into_iter()
            .map(|step| cmo_replay::StructuralStep {
                step_index: step.step_index,
                node_id: step.node_id,
                state_hash_after: step.state_hash_after,
                next_edge: step.next_edge,
            })
            .collect()
    } else {
        Vec::new()
    };
    Ok(StructuralReport {
        trace_id: trace_id.clone(),
        steps_checked,
        steps: detail,
    })
}

fn print_structural_report(report: &StructuralReport) {
    let steps: Vec<serde_json::Value> = report
        .steps
        .iter()
        .map(|step| {
            serde_json::json!({
                "stepIndex": step.step_index.get(),
                "nodeId": step.node_id.as_str(),
                "stateHashAfter": step.state_hash_after,
                "nextEdge": step.next_edge,
            })
        })
        .collect();
    let rendered = serde_json::json!({
        "traceId": report.trace_id.as_str(),
        "stepsChecked": report.steps_checked,
        "steps": steps,
    });
    println!("{rendered}");
}

fn print_compare_report(report: &CompareReport) {
    let divergences: Vec<serde_json::Value> = report
        .divergences
        .iter()
        .map(|divergence| {
            serde_json::json!({
                "stepIndex": divergence.step_index.get(),
                "field": divergence.field,
                "left": divergence.left,
                "right": divergence.right,
            })
        })
        .collect();
    let rendered = serde_json::json!({
        "stepsCompared": report.steps_compared,
        "divergences": divergences,
    });
    println!("{rendered}");
}
