//! The dependency registry and deferred work queue.
//!
//! The registry is the graph's single source of truth for which nodes
//! subscribe to which dependency keys. Nodes are held by weak reference
//! so dropping the last user handle tears the node down; dead entries
//! are swept as they are encountered.
//!
//! Invalidation never evaluates anything. It flips subscribers to stale
//! and enqueues them on the deferred queue; evaluation only happens when
//! a scheduling pass drains the queue in a later turn, or when a node's
//! value is pulled explicitly.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::graph::node::{DepKey, NodeId, NodeState};
use crate::store::{CellKey, Store};

/// A node the graph can invalidate and re-evaluate.
pub(crate) trait ReactiveNode: Send + Sync {
    fn node_id(&self) -> NodeId;

    /// Current lifecycle state.
    fn state(&self) -> NodeState;

    /// Note that a dependency changed. Must not evaluate anything.
    fn mark_stale(&self);

    /// Re-run the node's computation, rebuilding its dependency set.
    /// Returns whether the output changed.
    fn reevaluate(&self, store: &Store, graph: &Arc<Graph>) -> Result<bool>;
}

struct NodeSlot {
    reactive: Weak<dyn ReactiveNode>,
    /// Dependency keys recorded by the latest evaluation.
    deps: IndexSet<DepKey>,
}

#[derive(Default)]
struct RegistryState {
    nodes: IndexMap<NodeId, NodeSlot>,
    subscribers: HashMap<DepKey, IndexSet<NodeId>>,
    queue: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
}

/// The reactive dependency graph.
pub(crate) struct Graph {
    state: Mutex<RegistryState>,
    /// Depth of nested evaluations currently on the stack. Non-zero
    /// while any node is `Evaluating`; used to flag unstable-identity
    /// construction.
    eval_depth: AtomicUsize,
}

impl Graph {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            eval_depth: AtomicUsize::new(0),
        }
    }

    pub(crate) fn register(&self, id: NodeId, reactive: Weak<dyn ReactiveNode>) {
        let mut state = self.state.lock();
        state.nodes.insert(
            id,
            NodeSlot {
                reactive,
                deps: IndexSet::new(),
            },
        );
    }

    pub(crate) fn unregister(&self, id: NodeId) {
        let mut state = self.state.lock();
        let state = &mut *state;
        if let Some(slot) = state.nodes.shift_remove(&id) {
            for dep in &slot.deps {
                if let Some(subs) = state.subscribers.get_mut(dep) {
                    subs.shift_remove(&id);
                }
            }
        }
        state.queued.remove(&id);
    }

    /// Replace a node's dependency set after an evaluation.
    ///
    /// Dependency sets are rebuilt from scratch each run: anything not
    /// read this time is dropped, anything newly read is added.
    pub(crate) fn resubscribe(&self, id: NodeId, deps: IndexSet<DepKey>) {
        let mut state = self.state.lock();
        let state = &mut *state;
        let Some(slot) = state.nodes.get_mut(&id) else {
            return;
        };
        let old = std::mem::replace(&mut slot.deps, deps.clone());

        for dep in old.difference(&deps) {
            if let Some(subs) = state.subscribers.get_mut(dep) {
                subs.shift_remove(&id);
            }
        }
        for dep in deps.iter() {
            if !old.contains(dep) {
                state.subscribers.entry(*dep).or_default().insert(id);
            }
        }
        trace!(node = id.raw(), deps = deps.len(), "dependencies rebuilt");
    }

    /// Mark every subscriber of a key stale and enqueue it.
    ///
    /// Each node enters the queue at most once until a pass pops it, so
    /// a commit touching many of a node's dependencies schedules it
    /// exactly once.
    pub(crate) fn invalidate(&self, key: DepKey) {
        let to_mark = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let Some(ids) = state
                .subscribers
                .get(&key)
                .map(|s| s.iter().copied().collect::<Vec<_>>())
            else {
                return;
            };
            let mut to_mark = Vec::new();
            for id in ids {
                let Some(slot) = state.nodes.get(&id) else {
                    continue;
                };
                match slot.reactive.upgrade() {
                    Some(node) => {
                        if state.queued.insert(id) {
                            state.queue.push_back(id);
                        }
                        to_mark.push(node);
                    }
                    None => {
                        // Swept on a later unregister; skip for now.
                    }
                }
            }
            to_mark
        };

        for node in to_mark {
            node.mark_stale();
        }
    }

    /// Fan a commit's changed cells out to their subscribers.
    pub(crate) fn on_commit(&self, changed: &[CellKey]) {
        for key in changed {
            self.invalidate(DepKey::Cell(*key));
        }
    }

    /// Pop the next live queued node, sweeping dead entries.
    pub(crate) fn pop_ready(&self) -> Option<Arc<dyn ReactiveNode>> {
        let mut state = self.state.lock();
        let state = &mut *state;
        while let Some(id) = state.queue.pop_front() {
            state.queued.remove(&id);
            let Some(slot) = state.nodes.get(&id) else {
                continue;
            };
            if let Some(node) = slot.reactive.upgrade() {
                return Some(node);
            }
        }
        None
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.state.lock().queue.is_empty()
    }

    /// Abandon all queued work. Used when a pass exceeds its budget.
    pub(crate) fn clear_queue(&self) {
        let mut state = self.state.lock();
        state.queue.clear();
        state.queued.clear();
    }

    pub(crate) fn enter_eval(&self) {
        self.eval_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn exit_eval(&self) {
        self.eval_depth.fetch_sub(1, Ordering::Relaxed);
    }

    /// Non-zero while some node is evaluating on this runtime.
    pub(crate) fn eval_depth(&self) -> usize {
        self.eval_depth.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }
}
