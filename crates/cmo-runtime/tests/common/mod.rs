// crates/cmo-runtime/tests/common/mod.rs
// ============================================================================
// Module: Runtime Executor Test Helpers
// Description: Shared graph/backend fixtures for the runtime's integration
//              suites.
// Purpose: Reduce duplication across scenario and property tests.
// ============================================================================

#![allow(dead_code, reason = "helpers are selectively used across suites")]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use cmo_core::core::graph::Edge;
use cmo_core::core::graph::Graph;
use cmo_core::core::graph::Node;
use cmo_core::core::graph::NodeOutcome;
use cmo_core::core::graph::RetryPolicy;
use cmo_core::core::identifiers::EdgeKey;
use cmo_core::core::identifiers::GraphId;
use cmo_core::core::identifiers::GraphVersion;
use cmo_core::core::identifiers::NodeId;
use cmo_core::core::identifiers::Topic;
use cmo_core::error::NodeError;
use cmo_core::interfaces::ActivityClient;
use cmo_core::interfaces::CheckpointStore;
use cmo_policy::NoopPolicyEvaluator;
use cmo_runtime::ActivityContext;
use cmo_runtime::ExecutorBackends;
use cmo_store_sqlite::SqliteCheckpointStore;
use serde_json::Value;
use serde_json::json;

/// A node that increments `state.counter` by one and follows `next`.
pub fn counting_node(id: &str, next: Option<&str>) -> Node {
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

/// Builds the two-node `A -> B` graph from the seeded end-to-end scenario:
/// `A` produces `{counter: 1, next: "to_b"}`, `B` returns `{final: true,
/// next: null}` (here expressed through the shared counter field, since
/// `NodeOutcome` has no dedicated `final` slot).
pub fn two_node_graph() -> Arc<Graph> {
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

/// A node that calls `now()` twice and `rand(Some(100))` once, returning
/// all three in its output, matching the deterministic clock/RNG scenario.
pub fn clock_and_rand_node() -> Node {
    Node {
        id: NodeId::new("c"),
        name: "c".to_string(),
        logic: Arc::new(|state: &Value, _input: &Value, activity: &mut dyn ActivityClient| {
            let t0 = activity.now();
            let t1 = activity.now();
            let r = activity.rand(Some(100));
            Ok(NodeOutcome {
                new_state: state.clone(),
                output: json!({ "t0": t0, "t1": t1, "r": r }),
                next: None,
            })
        }),
        input_schema_ref: None,
        output_schema_ref: None,
        timeout_ms: None,
        retry_policy: RetryPolicy::none(),
    }
}

/// Builds a single-node graph around `node`.
pub fn single_node_graph(node: Node, id: &str) -> Arc<Graph> {
    let entry = node.id.clone();
    let mut nodes = BTreeMap::new();
    nodes.insert(entry.clone(), node);
    Arc::new(Graph {
        id: GraphId::new(id),
        version: GraphVersion::new("1"),
        entry_node_id: entry,
        nodes,
        edges: Vec::new(),
        initial_state: json!({}),
    })
}

/// A three-node chain `X -> Y -> Z`, each incrementing the shared counter,
/// matching the crash-and-resume scenario's graph shape.
pub fn three_node_chain() -> Arc<Graph> {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("x"), counting_node("x", Some("to_y")));
    nodes.insert(NodeId::new("y"), counting_node("y", Some("to_z")));
    nodes.insert(NodeId::new("z"), counting_node("z", None));
    Arc::new(Graph {
        id: GraphId::new("xyz"),
        version: GraphVersion::new("1"),
        entry_node_id: NodeId::new("x"),
        nodes,
        edges: vec![
            Edge { key: EdgeKey::new("to_y"), from: NodeId::new("x"), to: NodeId::new("y"), condition: None },
            Edge { key: EdgeKey::new("to_z"), from: NodeId::new("y"), to: NodeId::new("z"), condition: None },
        ],
        initial_state: json!({ "counter": 0 }),
    })
}

/// A node that fails on its first `attempts_before_success` calls (tracked
/// through the shared counter) before succeeding, used to exercise retry
/// policies.
pub fn flaky_node(id: &str, fail_times: u32) -> Node {
    let remaining = Arc::new(AtomicU32::new(fail_times));
    Node {
        id: NodeId::new(id),
        name: id.to_string(),
        logic: Arc::new(move |state: &Value, _input: &Value, _activity: &mut dyn ActivityClient| {
            if remaining.load(Ordering::SeqCst) > 0 {
                remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(NodeError::NodeFailed("transient failure".to_string()));
            }
            Ok(NodeOutcome { new_state: state.clone(), output: json!({}), next: None })
        }),
        input_schema_ref: None,
        output_schema_ref: None,
        timeout_ms: None,
        retry_policy: RetryPolicy { max_retries: 3, initial_backoff_ms: 0, backoff_multiplier: 1.0 },
    }
}

/// A fresh in-memory checkpoint store plus activity context, wired with the
/// no-op policy evaluator.
pub fn backends() -> ExecutorBackends {
    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open_in_memory().expect("open in-memory store"));
    store.initialize().expect("initialize store");
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

/// Same as [`backends`], but sharing the given store rather than creating a
/// fresh one — used to simulate a crash by dropping one executor and
/// building a second against the same persisted state.
pub fn backends_with_store(store: Arc<dyn CheckpointStore>) -> ExecutorBackends {
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
