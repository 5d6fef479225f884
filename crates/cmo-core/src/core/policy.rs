// crates/cmo-core/src/core/policy.rs
// ============================================================================
// Module: Policy Decision
// Description: The result of a policy gate evaluation.
// Purpose: A single, uniform shape returned by both pre- and
//          post-execution gates; never persisted on its own, only its
//          `reason` is copied onto a run or step record on denial.
// Dependencies: serde, serde_json
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// The outcome of a single policy gate evaluation.
///
/// # Invariants
/// - `reason` is empty when `allowed` is `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Whether the gated action may proceed.
    pub allowed: bool,
    /// Human-readable reason, empty when `allowed` is `true`.
    pub reason: String,
    /// Free-form key/value detail attached by the policy module.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl PolicyDecision {
    /// Builds an allowing decision with no reason or metadata.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builds a denying decision with the given reason.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attaches a metadata entry, builder-style.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use serde_json::json;

    use super::PolicyDecision;

    #[test]
    fn allow_has_empty_reason() {
        let decision = PolicyDecision::allow();
        assert!(decision.allowed);
        assert!(decision.reason.is_empty());
    }

    #[test]
    fn deny_preserves_reason() {
        let decision = PolicyDecision::deny("forbidden");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "forbidden");
    }

    #[test]
    fn with_metadata_attaches_entries() {
        let decision = PolicyDecision::deny("forbidden").with_metadata("rule", json!("r1"));
        assert_eq!(decision.metadata.get("rule"), Some(&json!("r1")));
    }
}
