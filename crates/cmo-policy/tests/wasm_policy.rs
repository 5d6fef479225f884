// crates/cmo-policy/tests/wasm_policy.rs
// ============================================================================
// Module: WASM Policy Evaluator Integration Tests
// Description: Bundle-loading failure modes for `WasmPolicyEvaluator`.
// Purpose: Cover the error paths around `initialize` that don't require a
//          real compiled policy bundle.
// ============================================================================

#![allow(clippy::unwrap_used, reason = "test-only assertions")]

use std::io::Write;

use cmo_core::core::identifiers::GraphId;
use cmo_core::core::identifiers::GraphVersion;
use cmo_core::core::identifiers::NodeId;
use cmo_core::core::identifiers::PolicyBundleId;
use cmo_core::core::identifiers::StepIndex;
use cmo_core::core::identifiers::TraceId;
use cmo_core::error::PolicyError;
use cmo_core::interfaces::PolicyEvaluator;
use cmo_policy::WasmPolicyEvaluator;
use cmo_policy::WasmPolicyLimits;
use serde_json::json;

/// A bundle path that does not exist fails with `BundleLoadFailed`, not a
/// panic.
#[test]
fn initialize_reports_bundle_load_failed_for_a_missing_path() {
    let mut evaluator = WasmPolicyEvaluator::new(WasmPolicyLimits::default());
    let err = evaluator
        .initialize(&PolicyBundleId::new("missing"), "/nonexistent/path/to/bundle.wasm")
        .unwrap_err();
    assert!(matches!(err, PolicyError::BundleLoadFailed(_)));
}

/// A file that exists but is not valid WebAssembly also fails with
/// `BundleLoadFailed`, surfacing the module validation error rather than
/// panicking partway through instantiation.
#[test]
fn initialize_reports_bundle_load_failed_for_a_malformed_module() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"this is not a wasm module").unwrap();

    let mut evaluator = WasmPolicyEvaluator::new(WasmPolicyLimits::default());
    let err = evaluator
        .initialize(&PolicyBundleId::new("malformed"), file.path().to_str().unwrap())
        .unwrap_err();
    assert!(matches!(err, PolicyError::BundleLoadFailed(_)));
}

/// Calling a gate before `initialize` has succeeded fails with
/// `EvaluationFailed` rather than panicking.
#[test]
fn check_pre_execution_before_initialize_fails_cleanly() {
    let evaluator = WasmPolicyEvaluator::new(WasmPolicyLimits::default());
    let err = evaluator
        .check_pre_execution(
            &GraphId::new("g"),
            &GraphVersion::new("1"),
            &TraceId::new("t"),
            StepIndex::ZERO,
            &NodeId::new("n"),
            &json!({}),
        )
        .unwrap_err();
    assert!(matches!(err, PolicyError::EvaluationFailed(_)));
}
