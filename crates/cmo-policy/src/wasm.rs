// crates/cmo-policy/src/wasm.rs
// ============================================================================
// Module: WASM Policy Evaluator
// Description: Loads a policy bundle compiled to WebAssembly and evaluates
//              its `check_pre`/`check_post` exports under fuel and memory
//              limits.
// Purpose: Concrete `PolicyEvaluator` backend; a fresh sandboxed `Store` is
//          created per gate call so one run's policy evaluation can never
//          observe another's.
// Dependencies: cmo-core, serde_jcs, serde_json, wasmtime
// ============================================================================

use std::fs;
use std::sync::Arc;

use cmo_core::core::identifiers::GraphId;
use cmo_core::core::identifiers::GraphVersion;
use cmo_core::core::identifiers::NodeId;
use cmo_core::core::identifiers::PolicyBundleId;
use cmo_core::core::identifiers::StepIndex;
use cmo_core::core::identifiers::TraceId;
use cmo_core::core::policy::PolicyDecision;
use cmo_core::error::PolicyError;
use cmo_core::interfaces::PolicyEvaluator;
use serde_json::Value;
use serde_json::json;
use wasmtime::Config;
use wasmtime::Engine;
use wasmtime::Linker;
use wasmtime::Module;
use wasmtime::Store;
use wasmtime::StoreLimits;
use wasmtime::StoreLimitsBuilder;
use wasmtime::TypedFunc;

/// Name of the guest export that allocates `len` bytes and returns a
/// pointer into the module's linear memory.
const EXPORT_ALLOC: &str = "alloc";
/// Name of the guest export evaluating the pre-execution gate.
const EXPORT_CHECK_PRE: &str = "check_pre";
/// Name of the guest export evaluating the post-execution gate.
const EXPORT_CHECK_POST: &str = "check_post";
/// Name of the guest's exported linear memory.
const EXPORT_MEMORY: &str = "memory";

/// Resource limits applied to every gate evaluation.
#[derive(Debug, Clone, Copy)]
pub struct WasmPolicyLimits {
    /// Fuel units budgeted per `check_pre`/`check_post` call.
    pub fuel_per_call: u64,
    /// Maximum linear memory, in bytes, a policy module may grow to.
    pub max_memory_bytes: usize,
}

impl Default for WasmPolicyLimits {
    fn default() -> Self {
        Self {
            fuel_per_call: 10_000_000,
            max_memory_bytes: 16 * 1024 * 1024,
        }
    }
}

struct StoreState {
    limits: StoreLimits,
}

/// A [`PolicyEvaluator`] backed by a WebAssembly policy bundle.
///
/// # Invariants
/// - `initialize` must be called successfully before either gate method is
///   called; calling a gate method before initialization fails with
///   [`PolicyError::EvaluationFailed`] rather than panicking.
pub struct WasmPolicyEvaluator {
    engine: Engine,
    limits: WasmPolicyLimits,
    bundle_id: Option<PolicyBundleId>,
    module: Option<Arc<Module>>,
}

impl WasmPolicyEvaluator {
    /// Builds an evaluator with no bundle loaded yet.
    ///
    /// # Panics
    ///
    /// Never panics in practice; `Engine::new` only fails on an invalid
    /// static `Config`, which this constructor does not produce.
    #[must_use]
    pub fn new(limits: WasmPolicyLimits) -> Self {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.wasm_threads(false);
        config.wasm_reference_types(false);
        config.wasm_bulk_memory(true);
        #[allow(clippy::expect_used, reason = "a static wasmtime::Config built here is always valid")]
        let engine = Engine::new(&config).expect("wasmtime engine configuration is always valid");
        Self {
            engine,
            limits,
            bundle_id: None,
            module: None,
        }
    }

    fn call_gate(&self, export: &str, request: &Value) -> Result<PolicyDecision, PolicyError> {
        let module = self
            .module
            .as_ref()
            .ok_or_else(|| PolicyError::EvaluationFailed("policy evaluator not initialized".to_string()))?;

        let request_bytes =
            serde_jcs::to_string(request).map_err(|err| PolicyError::EvaluationFailed(err.to_string()))?.into_bytes();

        let store_limits = StoreLimitsBuilder::new()
            .memory_size(self.limits.max_memory_bytes)
            .instances(1)
            .memories(1)
            .tables(1)
            .trap_on_grow_failure(true)
            .build();
        let mut store = Store::new(&self.engine, StoreState { limits: store_limits });
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(self.limits.fuel_per_call)
            .map_err(|err| PolicyError::EvaluationFailed(err.to_string()))?;

        let linker: Linker<StoreState> = Linker::new(&self.engine);
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|err| PolicyError::EvaluationFailed(format!("instantiation failed: {err}")))?;

        let memory = instance
            .get_memory(&mut store, EXPORT_MEMORY)
            .ok_or_else(|| PolicyError::EvaluationFailed("policy module does not export memory".to_string()))?;

        let alloc: TypedFunc<i32, i32> = instance
            .get_typed_func(&mut store, EXPORT_ALLOC)
            .map_err(|err| PolicyError::EvaluationFailed(format!("missing export {EXPORT_ALLOC}: {err}")))?;
        #[allow(clippy::cast_possible_truncation, reason = "canonical JSON requests fit well within i32 range")]
        let request_len = request_bytes.len() as i32;
        let request_ptr = alloc
            .call(&mut store, request_len)
            .map_err(|err| PolicyError::EvaluationFailed(format!("alloc call failed: {err}")))?;
        memory
            .write(&mut store, usize::try_from(request_ptr).unwrap_or(0), &request_bytes)
            .map_err(|err| PolicyError::EvaluationFailed(format!("failed writing request into guest memory: {err}")))?;

        let gate: TypedFunc<(i32, i32), i64> = instance
            .get_typed_func(&mut store, export)
            .map_err(|err| PolicyError::EvaluationFailed(format!("missing export {export}: {err}")))?;
        let packed = gate.call(&mut store, (request_ptr, request_len)).map_err(|err| {
            let message = err.to_string();
            if message.contains("fuel") {
                PolicyError::EvaluationFailed(format!("policy module exceeded its fuel budget: {message}"))
            } else {
                PolicyError::EvaluationFailed(format!("{export} call failed: {message}"))
            }
        })?;

        #[allow(clippy::cast_sign_loss, reason = "packed pointer/length halves are always non-negative by convention")]
        let out_ptr = (packed >> 32) as u32 as usize;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "length half of the packed result")]
        let out_len = (packed & 0xffff_ffff) as u32 as usize;

        let mut response_bytes = vec![0_u8; out_len];
        memory
            .read(&store, out_ptr, &mut response_bytes)
            .map_err(|err| PolicyError::EvaluationFailed(format!("failed reading response from guest memory: {err}")))?;

        serde_json::from_slice(&response_bytes)
            .map_err(|err| PolicyError::EvaluationFailed(format!("malformed policy decision: {err}")))
    }
}

/// Builds the `{graphId, graphVersion, traceId, stepIndex, nodeId, phase,
/// data}` request shape a policy bundle receives.
fn gate_request(
    phase: &str,
    graph_id: &GraphId,
    graph_version: &GraphVersion,
    trace_id: &TraceId,
    step_index: StepIndex,
    node_id: &NodeId,
    data: &Value,
) -> Value {
    json!({
        "phase": phase,
        "graphId": graph_id.as_str(),
        "graphVersion": graph_version.as_str(),
        "traceId": trace_id.as_str(),
        "stepIndex": step_index.get(),
        "nodeId": node_id.as_str(),
        "data": data,
    })
}

impl PolicyEvaluator for WasmPolicyEvaluator {
    fn initialize(&mut self, bundle_id: &PolicyBundleId, bundle_path: &str) -> Result<(), PolicyError> {
        let bytes = fs::read(bundle_path).map_err(|err| PolicyError::BundleLoadFailed(err.to_string()))?;
        Module::validate(&self.engine, &bytes).map_err(|err| PolicyError::BundleLoadFailed(err.to_string()))?;
        let module = Module::new(&self.engine, &bytes).map_err(|err| PolicyError::BundleLoadFailed(err.to_string()))?;
        self.bundle_id = Some(bundle_id.clone());
        self.module = Some(Arc::new(module));
        Ok(())
    }

    fn check_pre_execution(
        &self,
        graph_id: &GraphId,
        graph_version: &GraphVersion,
        trace_id: &TraceId,
        step_index: StepIndex,
        node_id: &NodeId,
        input: &Value,
    ) -> Result<PolicyDecision, PolicyError> {
        let request = gate_request("pre", graph_id, graph_version, trace_id, step_index, node_id, input);
        self.call_gate(EXPORT_CHECK_PRE, &request)
    }

    fn check_post_execution(
        &self,
        graph_id: &GraphId,
        graph_version: &GraphVersion,
        trace_id: &TraceId,
        step_index: StepIndex,
        node_id: &NodeId,
        result: &Value,
    ) -> Result<PolicyDecision, PolicyError> {
        let request = gate_request("post", graph_id, graph_version, trace_id, step_index, node_id, result);
        self.call_gate(EXPORT_CHECK_POST, &request)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use cmo_core::core::identifiers::GraphId;
    use cmo_core::core::identifiers::GraphVersion;
    use cmo_core::core::identifiers::NodeId;
    use cmo_core::core::identifiers::PolicyBundleId;
    use cmo_core::core::identifiers::StepIndex;
    use cmo_core::core::identifiers::TraceId;
    use cmo_core::interfaces::PolicyEvaluator;
    use serde_json::json;

    use super::WasmPolicyEvaluator;
    use super::WasmPolicyLimits;

    #[test]
    fn uninitialized_evaluator_fails_evaluation_rather_than_panicking() {
        let evaluator = WasmPolicyEvaluator::new(WasmPolicyLimits::default());
        let result = evaluator.check_pre_execution(
            &GraphId::new("g"),
            &GraphVersion::new("1"),
            &TraceId::new("t"),
            StepIndex::ZERO,
            &NodeId::new("n"),
            &json!({}),
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_bundle_file_fails_initialize() {
        let mut evaluator = WasmPolicyEvaluator::new(WasmPolicyLimits::default());
        let err = evaluator
            .initialize(&PolicyBundleId::new("missing"), "/nonexistent/bundle.wasm")
            .unwrap_err();
        assert!(matches!(err, cmo_core::error::PolicyError::BundleLoadFailed(_)));
    }
}
