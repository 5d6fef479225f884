// crates/cmo-runtime/src/executor.rs
// ============================================================================
// Module: Runtime Executor
// Description: The deterministic graph interpreter driving a run through the
//              activity boundary, one step at a time.
// Purpose: Turn a `Graph` plus a checkpoint store and policy evaluator into a
//          RECORD/REPLAY-reproducible execution, resumable from any crash.
// Dependencies: cmo-core, serde_json, tracing
// ============================================================================

//! ## Overview
//! [`RuntimeExecutor::execute`] is idempotent with respect to `traceId`: it
//! first reconstructs the run's current position by replaying every
//! persisted step in REPLAY mode (recomputing state from the graph's
//! `initialState` and the persisted activity records), then continues
//! executing new steps in RECORD mode from that point on. A run with no
//! persisted steps starts fresh at the graph's entry node; a run whose last
//! step has no `nextEdge` is already complete and is returned without
//! executing anything further.
//!
//! Per-node timeouts race a node invocation against a deadline using a
//! dedicated OS thread and an `mpsc` channel, mirroring the checkpoint
//! store's own writer-thread pattern rather than pulling in an async
//! runtime. A timed-out attempt's thread is not joined: it is left to run to
//! completion (or to observe its own per-attempt cancellation flag at its
//! next activity call) in the background, and the next retry attempt starts
//! from the clock/RNG cursor captured before that attempt began.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use cmo_core::core::graph::Edge;
use cmo_core::core::graph::Graph;
use cmo_core::core::graph::Node;
use cmo_core::core::graph::NodeOutcome;
use cmo_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use cmo_core::core::hashing::hash_canonical_json;
use cmo_core::core::identifiers::NodeId;
use cmo_core::core::identifiers::StepIndex;
use cmo_core::core::identifiers::TraceId;
use cmo_core::core::policy::PolicyDecision;
use cmo_core::core::run::ErrorDetail;
use cmo_core::core::run::Run;
use cmo_core::core::run::RunStatus;
use cmo_core::core::run::StepRecord;
use cmo_core::core::time::DEFAULT_VIRTUAL_CLOCK_INCREMENT_MILLIS;
use cmo_core::core::time::Timestamp;
use cmo_core::core::time::VirtualClock;
use cmo_core::error::EngineError;
use cmo_core::error::NodeError;
use cmo_core::error::ReplayError;
use cmo_core::error::RoutingError;
use cmo_core::interfaces::CheckpointStore;
use cmo_core::interfaces::PolicyEvaluator;
use rand::SeedableRng;
use serde_json::Map;
use serde_json::Value;
use tracing::info_span;
use tracing::warn;

use crate::activity::ActivityContext;
use crate::activity::ActivityMode;
use crate::activity::RuntimeActivityClient;
use crate::rng::SplitMix64;
use crate::rng::seed_from_bytes;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Every new run's virtual clock starts here. Fixed rather than wall-clock
/// derived, so RECORD and REPLAY agree byte-for-byte on every timestamp a
/// node observes.
const RUN_CLOCK_BASELINE: Timestamp = Timestamp::UnixMillis(0);

/// Tunables controlling timeout and clock behavior. Mirrors
/// `cmo_config::RuntimeConfig` without depending on it directly, so
/// `cmo-runtime` stays decoupled from the configuration crate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorConfig {
    /// Default per-node timeout applied when a node has no explicit
    /// `timeout_ms`.
    pub per_node_timeout_ms: u64,
    /// Maximum wall-clock duration a single run may take end-to-end.
    pub whole_run_timeout_ms: u64,
    /// Increment applied to the virtual clock on every `now()` call.
    pub clock_increment_millis: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            per_node_timeout_ms: 30_000,
            whole_run_timeout_ms: 600_000,
            clock_increment_millis: DEFAULT_VIRTUAL_CLOCK_INCREMENT_MILLIS,
        }
    }
}

/// The concrete backends a [`RuntimeExecutor`] is wired to.
pub struct ExecutorBackends {
    /// Durable storage for runs, steps, and activity records.
    pub store: Arc<dyn CheckpointStore>,
    /// The activity boundary's real-call backends, shared across every run
    /// this executor drives.
    pub activity_context: Arc<ActivityContext>,
    /// Pre/post-execution policy gate. Use a no-op evaluator when policy
    /// enforcement is disabled.
    pub policy: Arc<dyn PolicyEvaluator>,
}

// ============================================================================
// SECTION: Execution Result
// ============================================================================

/// The outcome of one [`RuntimeExecutor::execute`] call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The run's terminal (or, if interrupted mid-flight, final observed)
    /// status.
    pub status: RunStatus,
    /// The run's state after the last step that executed.
    pub final_state: Value,
    /// Every step record for this run, in ascending `stepIndex` order.
    pub steps: Vec<StepRecord>,
    /// Wall-clock duration of this `execute` call, in milliseconds.
    pub duration_ms: u64,
    /// The error that terminated the run, if `status` is not `Completed`.
    pub error: Option<ErrorDetail>,
}

// ============================================================================
// SECTION: Runtime Executor
// ============================================================================

/// The main-loop graph interpreter.
///
/// # Invariants
/// - `execute` is idempotent with respect to `traceId`: re-invoking with the
///   same arguments resumes from the last checkpoint rather than
///   re-executing already-completed steps.
/// - Step records for a given run are persisted in strictly ascending
///   `stepIndex` order.
pub struct RuntimeExecutor {
    graph: Arc<Graph>,
    backends: ExecutorBackends,
    config: ExecutorConfig,
    running: Mutex<HashMap<TraceId, Arc<AtomicBool>>>,
}

impl RuntimeExecutor {
    /// Builds an executor for `graph`, validating its structural invariants
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`cmo_core::core::graph::GraphError`] if `graph` fails
    /// validation.
    pub fn new(
        graph: Arc<Graph>,
        backends: ExecutorBackends,
        config: ExecutorConfig,
    ) -> Result<Self, cmo_core::core::graph::GraphError> {
        graph.validate()?;
        Ok(Self {
            graph,
            backends,
            config,
            running: Mutex::new(HashMap::new()),
        })
    }

    /// Executes `graph` for `trace_id` starting from `initial_input`,
    /// resuming from the last checkpoint when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the checkpoint store, policy evaluator,
    /// or resume reconstruction fails in a way the run cannot recover from.
    /// A node failure, policy denial, or routing failure is reported through
    /// [`ExecutionResult::status`]/[`ExecutionResult::error`] rather than as
    /// an `Err`; only infrastructure-level failures (store unavailable,
    /// policy evaluator error) are returned as `Err`.
    pub fn execute(&self, trace_id: TraceId, initial_input: Value) -> Result<ExecutionResult, EngineError> {
        let start_instant = Instant::now();
        let run_cancel = self.register(trace_id.clone());
        let outcome = self.run_to_completion(&trace_id, initial_input, &run_cancel, start_instant);
        self.unregister(&trace_id);
        outcome
    }

    /// Cooperatively signals the in-flight execution for `trace_id` to stop
    /// at the next step boundary. A no-op if the run is not executing in
    /// this process, or has already reached a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the checkpoint store cannot be reached.
    pub fn abort(&self, trace_id: &TraceId) -> Result<(), EngineError> {
        let found = {
            let guard = self.running.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.get(trace_id).cloned()
        };
        if let Some(flag) = found {
            flag.store(true, Ordering::SeqCst);
            return Ok(());
        }
        if let Some(run) = self.backends.store.get_run(trace_id)? {
            if !run.status.is_terminal() {
                self.backends.store.update_run_status(trace_id, RunStatus::Aborted, None)?;
            }
        }
        Ok(())
    }

    /// Returns the run's current status, consulting the checkpoint store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the checkpoint store cannot be reached.
    pub fn get_status(&self, trace_id: &TraceId) -> Result<Option<RunStatus>, EngineError> {
        Ok(self.backends.store.get_run(trace_id)?.map(|run| run.status))
    }

    fn register(&self, trace_id: TraceId) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut guard = self.running.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.insert(trace_id, Arc::clone(&flag));
        flag
    }

    fn unregister(&self, trace_id: &TraceId) {
        let mut guard = self.running.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.remove(trace_id);
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_lines, reason = "the main-loop algorithm reads as one unit")]
    fn run_to_completion(
        &self,
        trace_id: &TraceId,
        initial_input: Value,
        run_cancel: &Arc<AtomicBool>,
        start_instant: Instant,
    ) -> Result<ExecutionResult, EngineError> {
        let _span = info_span!("run", trace_id = %trace_id).entered();

        let existing = self.backends.store.get_run(trace_id)?;
        if let Some(run) = &existing {
            if run.status.is_terminal() {
                let position = self.reconstruct(trace_id, &initial_input)?;
                return Ok(ExecutionResult {
                    status: run.status,
                    final_state: position.state,
                    steps: position.steps,
                    duration_ms: elapsed_ms(start_instant),
                    error: run.error.clone(),
                });
            }
        } else {
            self.backends.store.save_run(&Run {
                trace_id: trace_id.clone(),
                graph_id: self.graph.id.clone(),
                graph_version: self.graph.version.clone(),
                status: RunStatus::Pending,
                started_at: RUN_CLOCK_BASELINE,
                finished_at: None,
                error: None,
            })?;
        }
        self.backends.store.update_run_status(trace_id, RunStatus::Running, None)?;

        let mut position = match self.reconstruct(trace_id, &initial_input) {
            Ok(position) => position,
            Err(err) => return self.finish_failed(trace_id, Vec::new(), initial_input, &err, start_instant),
        };

        let Some(mut current_node_id) = position.current_node.take() else {
            self.backends.store.update_run_status(trace_id, RunStatus::Completed, None)?;
            return Ok(ExecutionResult {
                status: RunStatus::Completed,
                final_state: position.state,
                steps: position.steps,
                duration_ms: elapsed_ms(start_instant),
                error: None,
            });
        };

        let mut state = position.state;
        let mut input = position.input;
        let mut step_index = position.next_step_index;
        let mut clock = position.clock;
        let mut rng = position.rng;
        let mut steps = position.steps;

        loop {
            if start_instant.elapsed() >= Duration::from_millis(self.config.whole_run_timeout_ms) {
                self.backends.store.update_run_status(trace_id, RunStatus::Timeout, None)?;
                return Ok(ExecutionResult {
                    status: RunStatus::Timeout,
                    final_state: state,
                    steps,
                    duration_ms: elapsed_ms(start_instant),
                    error: None,
                });
            }
            if run_cancel.load(Ordering::SeqCst) {
                self.backends.store.update_run_status(trace_id, RunStatus::Aborted, None)?;
                return Ok(ExecutionResult {
                    status: RunStatus::Aborted,
                    final_state: state,
                    steps,
                    duration_ms: elapsed_ms(start_instant),
                    error: None,
                });
            }

            let _step_span = info_span!("step", step_index = step_index.get(), node_id = %current_node_id).entered();

            let Some(node) = self.graph.nodes.get(&current_node_id) else {
                let detail = error_detail("UNROUTED_NEXT", format!("node {current_node_id} not found in graph"));
                return self.finish_failed(trace_id, steps, state, &EngineError::from(RoutingError::UnroutedNext(detail.message.clone())), start_instant);
            };

            match self.execute_step(trace_id, step_index, node, &state, &input, clock, rng) {
                Ok(StepOutcome::Advance {
                    step,
                    new_state,
                    next_node,
                    next_input,
                    clock: next_clock,
                    rng: next_rng,
                }) => {
                    self.backends.store.save_step(&step)?;
                    steps.push(step);
                    state = new_state;
                    input = next_input;
                    current_node_id = next_node;
                    step_index = step_index.next();
                    clock = next_clock;
                    rng = next_rng;
                }
                Ok(StepOutcome::Completed { step, final_state }) => {
                    self.backends.store.save_step(&step)?;
                    steps.push(step);
                    self.backends.store.update_run_status(trace_id, RunStatus::Completed, None)?;
                    return Ok(ExecutionResult {
                        status: RunStatus::Completed,
                        final_state,
                        steps,
                        duration_ms: elapsed_ms(start_instant),
                        error: None,
                    });
                }
                Ok(StepOutcome::Failed { error, step }) => {
                    if let Some(step) = step {
                        self.backends.store.save_step(&step)?;
                        steps.push(step);
                    }
                    let value = serde_json::to_value(&error).unwrap_or(Value::Null);
                    self.backends.store.update_run_status(trace_id, RunStatus::Failed, Some(value))?;
                    return Ok(ExecutionResult {
                        status: RunStatus::Failed,
                        final_state: state,
                        steps,
                        duration_ms: elapsed_ms(start_instant),
                        error: Some(error),
                    });
                }
                Err(err) => {
                    return self.finish_failed(trace_id, steps, state, &err, start_instant);
                }
            }
        }
    }

    fn finish_failed(
        &self,
        trace_id: &TraceId,
        steps: Vec<StepRecord>,
        final_state: Value,
        err: &EngineError,
        start_instant: Instant,
    ) -> Result<ExecutionResult, EngineError> {
        let detail = error_detail(err.code(), err.to_string());
        let value = serde_json::to_value(&detail).unwrap_or(Value::Null);
        self.backends.store.update_run_status(trace_id, RunStatus::Failed, Some(value))?;
        Ok(ExecutionResult {
            status: RunStatus::Failed,
            final_state,
            steps,
            duration_ms: elapsed_ms(start_instant),
            error: Some(detail),
        })
    }

    // ------------------------------------------------------------------
    // Single step
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments, reason = "mirrors the step's full cursor state")]
    fn execute_step(
        &self,
        trace_id: &TraceId,
        step_index: StepIndex,
        node: &Node,
        state: &Value,
        input: &Value,
        clock: VirtualClock,
        rng: SplitMix64,
    ) -> Result<StepOutcome, EngineError> {
        let state_hash_before = hash_value(state)?;
        let input_hash = hash_value(input)?;

        let pre = self
            .backends
            .policy
            .check_pre_execution(&self.graph.id, &self.graph.version, trace_id, step_index, &node.id, input)?;
        if !pre.allowed {
            return Ok(StepOutcome::Failed {
                error: policy_error_detail("POLICY_DENIED_PRE", &pre),
                step: None,
            });
        }

        let started_at = clock.peek();
        let wall_started = Instant::now();
        let (node_result, clock, rng) =
            self.run_node_with_retries(node, state, input, trace_id, step_index, clock, rng);
        let duration_ms = u64::try_from(wall_started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match node_result {
            Ok(outcome) => outcome,
            Err(err) => return Ok(StepOutcome::Failed { error: error_detail(err.code(), err.to_string()), step: None }),
        };

        let state_hash_after = hash_value(&outcome.new_state)?;
        let output_hash = hash_value(&outcome.output)?;
        let finished_at = clock.peek();

        let post = self
            .backends
            .policy
            .check_post_execution(&self.graph.id, &self.graph.version, trace_id, step_index, &node.id, &outcome.output)?;
        if !post.allowed {
            let error = policy_error_detail("POLICY_DENIED_POST", &post);
            let step = StepRecord {
                trace_id: trace_id.clone(),
                step_index,
                node_id: node.id.clone(),
                state_hash_before,
                input_hash,
                output_hash,
                state_hash_after,
                next_edge: outcome.next.clone(),
                started_at,
                finished_at,
                duration_ms,
                error: Some(error.clone()),
            };
            return Ok(StepOutcome::Failed { error, step: Some(step) });
        }

        let step = StepRecord {
            trace_id: trace_id.clone(),
            step_index,
            node_id: node.id.clone(),
            state_hash_before,
            input_hash,
            output_hash,
            state_hash_after,
            next_edge: outcome.next.clone(),
            started_at,
            finished_at,
            duration_ms,
            error: None,
        };

        match &outcome.next {
            None => Ok(StepOutcome::Completed { step, final_state: outcome.new_state }),
            Some(next_key) => match resolve_edge(self.graph.edges_from(&node.id), next_key, &outcome.output) {
                Ok(edge) => Ok(StepOutcome::Advance {
                    step,
                    new_state: outcome.new_state,
                    next_node: edge.to.clone(),
                    next_input: outcome.output,
                    clock,
                    rng,
                }),
                Err(routing_error) => Ok(StepOutcome::Failed {
                    error: error_detail(
                        match &routing_error {
                            RoutingError::UnroutedNext(_) => "UNROUTED_NEXT",
                            RoutingError::AmbiguousNext(_) => "AMBIGUOUS_NEXT",
                        },
                        routing_error.to_string(),
                    ),
                    step: Some(step),
                }),
            },
        }
    }

    /// Invokes `node`'s step function, retrying on non-fatal failure per its
    /// [`cmo_core::core::graph::RetryPolicy`], racing each attempt against
    /// the node's timeout.
    fn run_node_with_retries(
        &self,
        node: &Node,
        state: &Value,
        input: &Value,
        trace_id: &TraceId,
        step_index: StepIndex,
        mut clock: VirtualClock,
        mut rng: SplitMix64,
    ) -> (Result<NodeOutcome, NodeError>, VirtualClock, SplitMix64) {
        let timeout_ms = node.timeout_ms.unwrap_or(self.config.per_node_timeout_ms);
        let timeout = Duration::from_millis(timeout_ms);
        let mut attempt: u32 = 0;
        // Every attempt (and replay) must observe the same clock/RNG cursor,
        // since only the successful attempt's activity records survive;
        // rewind to this snapshot before each attempt rather than carrying
        // a failed attempt's advanced cursor into the next one.
        let step_start_clock = clock;
        let step_start_rng = rng;
        loop {
            let attempt_cancel = Arc::new(AtomicBool::new(false));
            let client = RuntimeActivityClient::from_parts(
                ActivityMode::Record,
                trace_id.clone(),
                step_index,
                step_start_clock,
                step_start_rng,
                attempt_cancel,
                Arc::clone(&self.backends.activity_context),
            );
            let (result, returned_client) =
                invoke_with_timeout(node, state.clone(), input.clone(), client, timeout);
            match result {
                Ok(outcome) => {
                    if let Some(client) = returned_client {
                        clock = VirtualClock::with_increment(client.clock_cursor(), self.config.clock_increment_millis);
                        rng = SplitMix64::from_raw_state(client.rng_cursor());
                    }
                    return (Ok(outcome), clock, rng);
                }
                Err(err) => {
                    if attempt < node.retry_policy.max_retries {
                        let backoff = node.retry_policy.backoff_for_attempt(attempt + 1);
                        if backoff > 0 {
                            thread::sleep(Duration::from_millis(backoff));
                        }
                        attempt += 1;
                        warn!(attempt, %err, "node attempt failed, retrying");
                        continue;
                    }
                    let final_error = if attempt > 0 {
                        NodeError::NodeExhaustedRetries {
                            attempts: attempt + 1,
                            message: err.to_string(),
                        }
                    } else {
                        err
                    };
                    return (Err(final_error), step_start_clock, step_start_rng);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Resume reconstruction
    // ------------------------------------------------------------------

    /// Reconstructs a run's current position by replaying every persisted
    /// step in REPLAY mode, recomputing state from the graph's
    /// `initialState` and the persisted activity records.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Replay`] with
    /// [`ReplayError::ResumeDivergence`] when a recomputed hash disagrees
    /// with the persisted record, or when a node's replayed invocation
    /// fails outright (commonly because an activity record required for
    /// replay is missing).
    fn reconstruct(&self, trace_id: &TraceId, initial_input: &Value) -> Result<ResumePosition, EngineError> {
        let steps = self.backends.store.get_all_steps(trace_id)?;

        let mut state = self.graph.initial_state.clone();
        let mut input = initial_input.clone();
        let mut clock = VirtualClock::with_increment(RUN_CLOCK_BASELINE, self.config.clock_increment_millis);
        let mut rng = SplitMix64::from_seed(seed_from_bytes(trace_id.as_str().as_bytes()));
        let mut current_node_id = self.graph.entry_node_id.clone();

        if let Some(first) = steps.first() {
            let expected = hash_value(&state)?;
            if expected != first.state_hash_before {
                return Err(divergence(first.step_index, "stateHashBefore"));
            }
        }

        for step in &steps {
            let node = self
                .graph
                .nodes
                .get(&current_node_id)
                .ok_or_else(|| divergence(step.step_index, "nodeId"))?;

            let input_hash = hash_value(&input)?;
            if input_hash != step.input_hash {
                return Err(divergence(step.step_index, "inputHash"));
            }

            let cancelled = Arc::new(AtomicBool::new(false));
            let mut client = RuntimeActivityClient::from_parts(
                ActivityMode::Replay,
                trace_id.clone(),
                step.step_index,
                clock,
                rng,
                cancelled,
                Arc::clone(&self.backends.activity_context),
            );
            let outcome = node
                .logic
                .call(&state, &input, &mut client)
                .map_err(|_err| divergence(step.step_index, "activity"))?;
            clock = VirtualClock::with_increment(client.clock_cursor(), self.config.clock_increment_millis);
            rng = SplitMix64::from_raw_state(client.rng_cursor());

            let state_hash_after = hash_value(&outcome.new_state)?;
            if state_hash_after != step.state_hash_after {
                return Err(divergence(step.step_index, "stateHashAfter"));
            }
            let output_hash = hash_value(&outcome.output)?;
            if output_hash != step.output_hash {
                return Err(divergence(step.step_index, "outputHash"));
            }
            if outcome.next != step.next_edge {
                return Err(divergence(step.step_index, "nextEdge"));
            }

            state = outcome.new_state;
            input = outcome.output;
            if let Some(next_key) = &step.next_edge {
                let edge = resolve_edge(self.graph.edges_from(&current_node_id), next_key, &input)
                    .map_err(|_err| divergence(step.step_index, "nextEdge"))?;
                current_node_id = edge.to.clone();
            }
        }

        let next_step_index = steps.last().map_or(StepIndex::ZERO, |step| step.step_index.next());
        let completed = steps.last().is_some_and(|step| step.next_edge.is_none());

        Ok(ResumePosition {
            next_step_index,
            state,
            input,
            current_node: if completed { None } else { Some(current_node_id) },
            clock,
            rng,
            steps,
        })
    }
}

/// The reconstructed position of a run: where it left off and what state it
/// reached, computed by replaying every persisted step.
struct ResumePosition {
    next_step_index: StepIndex,
    state: Value,
    input: Value,
    /// The node to execute next, or `None` if the run already reached a
    /// terminal node.
    current_node: Option<NodeId>,
    clock: VirtualClock,
    rng: SplitMix64,
    steps: Vec<StepRecord>,
}

/// What a single step invocation produced.
enum StepOutcome {
    /// The node succeeded and routed to another node.
    Advance {
        step: StepRecord,
        new_state: Value,
        next_node: NodeId,
        next_input: Value,
        clock: VirtualClock,
        rng: SplitMix64,
    },
    /// The node succeeded and returned no `next`, terminating the run.
    Completed { step: StepRecord, final_state: Value },
    /// The step could not complete; `step` is `Some` when a step record was
    /// still durably persisted (post-execution denial, routing failure).
    Failed { error: ErrorDetail, step: Option<StepRecord> },
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Invokes `node`'s logic on a dedicated thread, racing it against
/// `timeout`. Returns the activity client used by the attempt whenever the
/// thread finished within the deadline, so its clock/RNG cursor can seed the
/// next attempt; returns `None` on timeout, since the thread is abandoned
/// rather than joined.
fn invoke_with_timeout(
    node: &Node,
    state: Value,
    input: Value,
    mut client: RuntimeActivityClient,
    timeout: Duration,
) -> (Result<NodeOutcome, NodeError>, Option<RuntimeActivityClient>) {
    let logic = Arc::clone(&node.logic);
    let (tx, rx) = mpsc::channel();
    let _handle = thread::spawn(move || {
        let outcome = logic.call(&state, &input, &mut client);
        let _ = tx.send((outcome, client));
    });
    match rx.recv_timeout(timeout) {
        Ok((outcome, client)) => (outcome, Some(client)),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            (Err(NodeError::NodeTimeout(timeout_ms)), None)
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            (Err(NodeError::NodeFailed("node invocation thread terminated without a result".to_string())), None)
        }
    }
}

/// Finds the edge eligible for `next_key` from the edges given, applying the
/// optional guard condition and the ambiguity tie-break rule.
///
/// # Errors
///
/// Returns [`RoutingError::UnroutedNext`] when no edge matches `next_key` or
/// its guard rejects `output`, and [`RoutingError::AmbiguousNext`] when more
/// than one eligible edge is found (unreachable under a validated graph,
/// whose edge keys are unique per source node, but checked defensively).
fn resolve_edge<'a>(
    edges: impl Iterator<Item = &'a Edge>,
    next_key: &str,
    output: &Value,
) -> Result<&'a Edge, RoutingError> {
    let mut matches = edges.filter(|edge| edge.key.as_str() == next_key);
    let Some(first) = matches.next() else {
        return Err(RoutingError::UnroutedNext(next_key.to_string()));
    };
    if matches.next().is_some() {
        return Err(RoutingError::AmbiguousNext(next_key.to_string()));
    }
    if let Some(condition) = &first.condition {
        if !condition_holds(condition, output) {
            return Err(RoutingError::UnroutedNext(next_key.to_string()));
        }
    }
    Ok(first)
}

/// Evaluates an edge's guard condition against a node's output.
///
/// `condition` is a JSON Pointer (RFC 6901) into `output`; the edge is
/// eligible iff the pointed-to value is truthy (`true`, a non-zero number, a
/// non-empty string/array/object — not `null`, `false`, `0`, or empty). An
/// empty pointer (`""`) evaluates the whole output value.
fn condition_holds(condition: &str, output: &Value) -> bool {
    let pointer = if condition.is_empty() || condition.starts_with('/') {
        condition.to_string()
    } else {
        format!("/{condition}")
    };
    output.pointer(&pointer).is_some_and(is_truthy)
}

/// Truthiness used by [`condition_holds`]: JSON has no single canonical
/// notion of "truthy", so this mirrors the common JSON-logic convention.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn hash_value(value: &Value) -> Result<String, EngineError> {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, value)
        .map(|digest| digest.value)
        .map_err(|err| EngineError::from(NodeError::NodeFailed(format!("failed to hash run state: {err}"))))
}

fn divergence(step_index: StepIndex, hash_name: &str) -> EngineError {
    EngineError::from(ReplayError::ResumeDivergence {
        step_index: step_index.get(),
        hash_name: hash_name.to_string(),
    })
}

fn error_detail(code: &str, message: String) -> ErrorDetail {
    ErrorDetail { code: code.to_string(), message, details: None }
}

fn policy_error_detail(code: &str, decision: &PolicyDecision) -> ErrorDetail {
    let details = if decision.metadata.is_empty() {
        None
    } else {
        Some(Value::Object(Map::from_iter(
            decision.metadata.iter().map(|(key, value)| (key.clone(), value.clone())),
        )))
    };
    ErrorDetail { code: code.to_string(), message: decision.reason.clone(), details }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use std::collections::BTreeMap;

    use cmo_core::core::identifiers::EdgeKey;
    use cmo_core::core::identifiers::GraphId;
    use cmo_core::core::identifiers::GraphVersion;
    use cmo_core::core::identifiers::Topic;
    use cmo_core::core::graph::RetryPolicy;
    use cmo_core::interfaces::ActivityClient;
    use cmo_policy::NoopPolicyEvaluator;
    use cmo_store_sqlite::SqliteCheckpointStore;
    use serde_json::json;

    use super::*;

    fn counting_node(id: &str, next: Option<&str>) -> Node {
        let next = next.map(ToString::to_string);
        Node {
            id: NodeId::new(id),
            name: id.to_string(),
            logic: Arc::new(move |state: &Value, _input: &Value, _activity: &mut dyn ActivityClient| {
                let counter = state.get("counter").and_then(Value::as_i64).unwrap_or(0) + 1;
                Ok(NodeOutcome {
                    new_state: json!({ "counter": counter }),
                    output: json!({ "counter": counter }),
                    next: next.clone(),
                })
            }),
            input_schema_ref: None,
            output_schema_ref: None,
            timeout_ms: None,
            retry_policy: RetryPolicy::none(),
        }
    }

    fn two_node_graph() -> Arc<Graph> {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::new("a"), counting_node("a", Some("to_b")));
        nodes.insert(NodeId::new("b"), counting_node("b", None));
        Arc::new(Graph {
            id: GraphId::new("g"),
            version: GraphVersion::new("1"),
            entry_node_id: NodeId::new("a"),
            nodes,
            edges: vec![Edge {
                key: EdgeKey::new("to_b"),
                from: NodeId::new("a"),
                to: NodeId::new("b"),
                condition: None,
            }],
            initial_state: json!({ "counter": 0 }),
        })
    }

    fn backends() -> ExecutorBackends {
        let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open_in_memory().unwrap());
        store.initialize().unwrap();
        ExecutorBackends {
            store: Arc::clone(&store),
            activity_context: Arc::new(ActivityContext {
                store,
                http_client: Arc::new(reqwest::blocking::Client::new()),
                transport: None,
                a2a_topic: Topic::new("a2a"),
                mcp_client: None,
                database_client: None,
                blob_store: None,
                replay_payload_size_threshold_bytes: 256 * 1024,
            }),
            policy: Arc::new(NoopPolicyEvaluator),
        }
    }

    #[test]
    fn two_node_graph_completes_with_two_steps() {
        let executor = RuntimeExecutor::new(two_node_graph(), backends(), ExecutorConfig::default()).unwrap();
        let result = executor.execute(TraceId::new("trace-1"), json!({})).unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].state_hash_before, result.steps[0].state_hash_after);
        assert_eq!(result.final_state, json!({ "counter": 2 }));
    }

    #[test]
    fn re_invoking_a_completed_run_is_idempotent() {
        let executor = RuntimeExecutor::new(two_node_graph(), backends(), ExecutorConfig::default()).unwrap();
        let trace_id = TraceId::new("trace-2");
        let first = executor.execute(trace_id.clone(), json!({})).unwrap();
        let second = executor.execute(trace_id, json!({})).unwrap();
        assert_eq!(first.final_state, second.final_state);
        assert_eq!(second.steps.len(), 2);
    }

    #[test]
    fn zero_step_graph_completes_with_one_step() {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::new("only"), counting_node("only", None));
        let graph = Arc::new(Graph {
            id: GraphId::new("g0"),
            version: GraphVersion::new("1"),
            entry_node_id: NodeId::new("only"),
            nodes,
            edges: vec![],
            initial_state: json!({ "counter": 0 }),
        });
        let executor = RuntimeExecutor::new(graph, backends(), ExecutorConfig::default()).unwrap();
        let result = executor.execute(TraceId::new("trace-3"), json!({})).unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.steps.len(), 1);
    }

    #[test]
    fn unrouted_next_fails_the_run() {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::new("a"), counting_node("a", Some("nowhere")));
        let graph = Arc::new(Graph {
            id: GraphId::new("g-bad"),
            version: GraphVersion::new("1"),
            entry_node_id: NodeId::new("a"),
            nodes,
            edges: vec![],
            initial_state: json!({ "counter": 0 }),
        });
        let executor = RuntimeExecutor::new(graph, backends(), ExecutorConfig::default()).unwrap();
        let result = executor.execute(TraceId::new("trace-4"), json!({})).unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error.unwrap().code, "UNROUTED_NEXT");
        assert_eq!(result.steps.len(), 1);
    }

    #[test]
    fn abort_after_completion_is_a_no_op() {
        let executor = RuntimeExecutor::new(two_node_graph(), backends(), ExecutorConfig::default()).unwrap();
        let trace_id = TraceId::new("trace-5");
        let result = executor.execute(trace_id.clone(), json!({})).unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        executor.abort(&trace_id).unwrap();
        assert_eq!(executor.get_status(&trace_id).unwrap(), Some(RunStatus::Completed));
    }

    #[test]
    fn node_timeout_fails_without_retry_budget() {
        let node = Node {
            id: NodeId::new("slow"),
            name: "slow".to_string(),
            logic: Arc::new(|state: &Value, _input: &Value, _activity: &mut dyn ActivityClient| {
                thread::sleep(Duration::from_millis(50));
                Ok(NodeOutcome { new_state: state.clone(), output: json!({}), next: None })
            }),
            input_schema_ref: None,
            output_schema_ref: None,
            timeout_ms: Some(1),
            retry_policy: RetryPolicy::none(),
        };
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::new("slow"), node);
        let graph = Arc::new(Graph {
            id: GraphId::new("g-slow"),
            version: GraphVersion::new("1"),
            entry_node_id: NodeId::new("slow"),
            nodes,
            edges: vec![],
            initial_state: json!({}),
        });
        let executor = RuntimeExecutor::new(graph, backends(), ExecutorConfig::default()).unwrap();
        let result = executor.execute(TraceId::new("trace-6"), json!({})).unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error.unwrap().code, "NODE_TIMEOUT");
    }

    #[test]
    fn condition_truthiness_gates_edge_eligibility() {
        assert!(condition_holds("/ok", &json!({ "ok": true })));
        assert!(!condition_holds("/ok", &json!({ "ok": false })));
        assert!(!condition_holds("/missing", &json!({})));
        assert!(condition_holds("", &json!(true)));
    }
}
