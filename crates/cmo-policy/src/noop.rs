// crates/cmo-policy/src/noop.rs
// ============================================================================
// Module: No-op Policy Evaluator
// Description: An always-allow policy evaluator for `policy.enabled = false`.
// Purpose: Let the runtime depend on one `PolicyEvaluator` trait object
//          regardless of configuration, without touching wasmtime at all
//          when policy gates are disabled.
// Dependencies: cmo-core
// ============================================================================

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

/// A policy evaluator that always allows, never loading or evaluating a
/// bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPolicyEvaluator;

impl PolicyEvaluator for NoopPolicyEvaluator {
    fn initialize(&mut self, _bundle_id: &PolicyBundleId, _bundle_path: &str) -> Result<(), PolicyError> {
        Ok(())
    }

    fn check_pre_execution(
        &self,
        _graph_id: &GraphId,
        _graph_version: &GraphVersion,
        _trace_id: &TraceId,
        _step_index: StepIndex,
        _node_id: &NodeId,
        _input: &Value,
    ) -> Result<PolicyDecision, PolicyError> {
        Ok(PolicyDecision::allow())
    }

    fn check_post_execution(
        &self,
        _graph_id: &GraphId,
        _graph_version: &GraphVersion,
        _trace_id: &TraceId,
        _step_index: StepIndex,
        _node_id: &NodeId,
        _result: &Value,
    ) -> Result<PolicyDecision, PolicyError> {
        Ok(PolicyDecision::allow())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use cmo_core::core::identifiers::GraphId;
    use cmo_core::core::identifiers::GraphVersion;
    use cmo_core::core::identifiers::NodeId;
    use cmo_core::core::identifiers::StepIndex;
    use cmo_core::core::identifiers::TraceId;
    use cmo_core::interfaces::PolicyEvaluator;
    use serde_json::json;

    use super::NoopPolicyEvaluator;

    #[test]
    fn noop_always_allows_both_gates() {
        let evaluator = NoopPolicyEvaluator;
        let decision = evaluator
            .check_pre_execution(
                &GraphId::new("g"),
                &GraphVersion::new("1"),
                &TraceId::new("t"),
                StepIndex::ZERO,
                &NodeId::new("n"),
                &json!({}),
            )
            .unwrap();
        assert!(decision.allowed);
        let decision = evaluator
            .check_post_execution(
                &GraphId::new("g"),
                &GraphVersion::new("1"),
                &TraceId::new("t"),
                StepIndex::ZERO,
                &NodeId::new("n"),
                &json!({}),
            )
            .unwrap();
        assert!(decision.allowed);
    }
}
