//! Node identity and lifecycle states for the dependency graph.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::CellKey;

/// Unique identifier for a reactive node.
///
/// Identity is assigned once at construction and is what subscriptions
/// attach to. A node rebuilt on every pass gets a fresh id each time and
/// therefore cannot keep its subscriptions — stable identity is the
/// caller's responsibility, the runtime only detects the smell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a derived node.
///
/// Nodes move `Unevaluated → Evaluating → Settled`, then bounce between
/// `Stale` and `Evaluating` for as long as their dependencies keep
/// changing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Never evaluated; has no dependency set yet.
    Unevaluated,

    /// Evaluation is in progress and reads are being recorded.
    Evaluating,

    /// The cached output matches the latest evaluation of its inputs.
    Settled,

    /// A dependency changed since the last evaluation.
    Stale,
}

impl NodeState {
    /// Whether the node's cached output can be trusted as-is.
    pub fn is_settled(&self) -> bool {
        matches!(self, NodeState::Settled)
    }

    /// Whether the scheduler (or a pull) should evaluate this node.
    pub fn needs_evaluation(&self) -> bool {
        matches!(self, NodeState::Unevaluated | NodeState::Stale)
    }
}

/// What a node can depend on: a state cell, or another node's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepKey {
    Cell(CellKey),
    Node(NodeId),
}
