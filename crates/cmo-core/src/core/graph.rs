// crates/cmo-core/src/core/graph.rs
// ============================================================================
// Module: Graph, Node, Edge
// Description: The versioned, immutable graph definition a run executes.
// Purpose: Define the shape the runtime executor interprets; graphs are
//          never mutated in-place, only superseded by a new `(id, version)`.
// Dependencies: serde_json, std::collections, std::sync
// ============================================================================

//! ## Overview
//! A [`Graph`] is a pure data structure plus a set of node functions. The
//! executor never constructs a graph itself; callers build one (typically
//! once, at startup) and the executor only reads it. [`Graph::validate`]
//! checks the structural invariants spec.md requires before a graph is
//! ever handed to the executor.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::core::identifiers::EdgeKey;
use crate::core::identifiers::GraphId;
use crate::core::identifiers::GraphVersion;
use crate::core::identifiers::NodeId;
use crate::error::NodeError;
use crate::interfaces::ActivityClient;

// ============================================================================
// SECTION: Node Logic
// ============================================================================

/// What a node function returns on success.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    /// The run's state after this step.
    pub new_state: Value,
    /// The value passed to the next node as its input.
    pub output: Value,
    /// The edge key to follow, or `None` to terminate the run.
    pub next: Option<String>,
}

/// A node's pure step function.
///
/// # Invariants
/// - Must be a deterministic function of `(state, input, activity
///   sequence)`: it may not read the wall clock, the OS RNG, the
///   environment, the filesystem, the network, or any process-global
///   mutable state directly — only through the `activity` parameter.
pub trait NodeLogic: Send + Sync {
    /// Executes one step given the current state, this step's input, and
    /// the activity boundary through which all non-determinism must flow.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] when the node function fails; the runtime
    /// applies the node's retry policy before treating this as fatal.
    fn call(
        &self,
        state: &Value,
        input: &Value,
        activity: &mut dyn ActivityClient,
    ) -> Result<NodeOutcome, NodeError>;
}

impl<F> NodeLogic for F
where
    F: Fn(&Value, &Value, &mut dyn ActivityClient) -> Result<NodeOutcome, NodeError> + Send + Sync,
{
    fn call(
        &self,
        state: &Value,
        input: &Value,
        activity: &mut dyn ActivityClient,
    ) -> Result<NodeOutcome, NodeError> {
        self(state, input, activity)
    }
}

/// How many times, and under what backoff, a node is retried after a
/// non-fatal failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of additional attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Multiplier applied to the backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// No retries: a single attempt only.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Returns the backoff delay, in milliseconds, before the given retry
    /// attempt (1-based).
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "attempt counts fit f64 exactly at realistic retry budgets")]
    pub fn backoff_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let scaled = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        scaled.round() as u64
    }
}

// ============================================================================
// SECTION: Node
// ============================================================================

/// A single node in a graph: identity, logic, and optional per-node policy.
#[derive(Clone)]
pub struct Node {
    /// Unique identifier within the owning graph.
    pub id: NodeId,
    /// Human-readable name.
    pub name: String,
    /// The node's step function.
    pub logic: Arc<dyn NodeLogic>,
    /// Reference to the JSON schema validating this node's input, if any.
    pub input_schema_ref: Option<String>,
    /// Reference to the JSON schema validating this node's output, if any.
    pub output_schema_ref: Option<String>,
    /// Maximum wall-clock time this node may run before it is cancelled.
    pub timeout_ms: Option<u64>,
    /// Retry policy applied on non-fatal failure.
    pub retry_policy: RetryPolicy,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Edge
// ============================================================================

/// A directed edge between two nodes, selected by the `next` key a node
/// returns.
///
/// # Invariants
/// - Edge keys are unique among edges sharing a `from` node.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Key matched against a node's returned `next` value.
    pub key: EdgeKey,
    /// Source node.
    pub from: NodeId,
    /// Destination node.
    pub to: NodeId,
    /// Optional guard evaluated against the source node's output; when
    /// present, the edge is only eligible if the condition holds.
    pub condition: Option<String>,
}

// ============================================================================
// SECTION: Graph
// ============================================================================

/// Errors detected while validating a graph's structural invariants.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// `entryNodeId` does not refer to a node in the graph.
    #[error("entry node {0} not found in graph")]
    UnknownEntryNode(NodeId),
    /// An edge's `from` or `to` does not refer to a node in the graph.
    #[error("edge {key} references unknown node {node}")]
    DanglingEdge {
        /// The offending edge's key.
        key: EdgeKey,
        /// The unknown node identifier.
        node: NodeId,
    },
    /// Two edges share a `from` node and a `key`.
    #[error("duplicate edge key {key} from node {from}")]
    DuplicateEdgeKey {
        /// The duplicated key.
        key: EdgeKey,
        /// The shared source node.
        from: NodeId,
    },
}

/// A versioned, immutable graph definition.
///
/// # Invariants
/// - `entry_node_id` refers to a node in `nodes`.
/// - Every edge's `from` and `to` refer to nodes in `nodes`.
/// - Edge keys are unique per `from` node.
pub struct Graph {
    /// Identifier shared across all versions of this graph.
    pub id: GraphId,
    /// Version of this specific definition.
    pub version: GraphVersion,
    /// The node the executor starts at for a fresh run.
    pub entry_node_id: NodeId,
    /// All nodes in the graph, keyed by id.
    pub nodes: BTreeMap<NodeId, Node>,
    /// All edges in the graph.
    pub edges: Vec<Edge>,
    /// The state a fresh run begins with.
    pub initial_state: Value,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("entry_node_id", &self.entry_node_id)
            .field("node_count", &self.nodes.len())
            .field("edge_count", &self.edges.len())
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Checks the structural invariants required before this graph may be
    /// executed.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] on the first invariant violation found.
    pub fn validate(&self) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&self.entry_node_id) {
            return Err(GraphError::UnknownEntryNode(self.entry_node_id.clone()));
        }

        let mut seen_keys_per_source: BTreeMap<NodeId, BTreeSet<EdgeKey>> = BTreeMap::new();
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(GraphError::DanglingEdge {
                    key: edge.key.clone(),
                    node: edge.from.clone(),
                });
            }
            if !self.nodes.contains_key(&edge.to) {
                return Err(GraphError::DanglingEdge {
                    key: edge.key.clone(),
                    node: edge.to.clone(),
                });
            }
            let keys = seen_keys_per_source.entry(edge.from.clone()).or_default();
            if !keys.insert(edge.key.clone()) {
                return Err(GraphError::DuplicateEdgeKey {
                    key: edge.key.clone(),
                    from: edge.from.clone(),
                });
            }
        }
        Ok(())
    }

    /// Returns the edges originating from `node_id`.
    pub fn edges_from<'a>(&'a self, node_id: &'a NodeId) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |edge| &edge.from == node_id)
    }
}
