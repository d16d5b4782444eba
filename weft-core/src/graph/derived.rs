//! Derived nodes: cached, dependency-tracked computations.
//!
//! A derived node wraps a pure function over cell reads. Its output is a
//! read-only projection with a stable identity: subscriptions attach to
//! the node's id, which is assigned once at construction and survives
//! every re-evaluation.
//!
//! # Identity discipline
//!
//! Constructing a derived node inside another node's per-element
//! iteration mints a fresh identity on every pass, which silently breaks
//! subscription continuity. The correct pattern is one node wrapping the
//! whole iteration, with the loop running inside the body over plain
//! reads. Construction during an active evaluation is therefore flagged
//! with a warning.
//!
//! # Evaluation
//!
//! Nodes are lazy like a memo: they evaluate on first read, and again
//! when read or scheduled after going stale. Dependencies are rebuilt
//! from scratch on every run — a dependency not read this time is
//! dropped.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::graph::node::{DepKey, NodeId, NodeState};
use crate::graph::registry::{Graph, ReactiveNode};
use crate::graph::scope::EvalScope;
use crate::runtime::Runtime;
use crate::store::Store;

struct DerivedInner<T> {
    id: NodeId,

    /// The computation. Runs with an explicit read scope; every read
    /// through the scope becomes a dependency edge.
    compute: Box<dyn Fn(&mut EvalScope<'_>) -> Result<T> + Send + Sync>,

    /// The cached output (None until first evaluation).
    value: RwLock<Option<T>>,

    /// Current lifecycle state.
    state: RwLock<NodeState>,

    graph: Weak<Graph>,
}

/// A cached derived value with automatic dependency tracking.
///
/// Cloning shares the node; the last clone dropping unregisters it.
pub struct Derived<T> {
    inner: Arc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a derived node on a runtime.
    ///
    /// The computation does not run here; it runs on first read or when
    /// the scheduler reaches the node.
    pub fn new<F>(runtime: &Runtime, compute: F) -> Self
    where
        F: Fn(&mut EvalScope<'_>) -> Result<T> + Send + Sync + 'static,
    {
        let graph = runtime.graph();
        if graph.eval_depth() > 0 {
            warn!(
                "derived node constructed while another node is evaluating; \
                 its identity will not be stable across re-evaluations"
            );
        }

        let inner = Arc::new(DerivedInner {
            id: NodeId::new(),
            compute: Box::new(compute),
            value: RwLock::new(None),
            state: RwLock::new(NodeState::Unevaluated),
            graph: Arc::downgrade(graph),
        });

        let object: Arc<dyn ReactiveNode> = inner.clone();
        graph.register(inner.id, Arc::downgrade(&object));

        Self { inner }
    }

    /// The node's stable identity.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        *self.inner.state.read().expect("state lock poisoned")
    }

    /// Read the current output, evaluating first if needed.
    ///
    /// This is the pull side: unscheduled stale nodes catch up here.
    pub fn get(&self, runtime: &Runtime) -> Result<T> {
        self.inner.ensure_current(runtime.store(), runtime.graph())?;
        Ok(self
            .inner
            .value
            .read()
            .expect("value lock poisoned")
            .clone()
            .expect("settled node has a value"))
    }

    /// Read this node from inside another node's evaluation, recording
    /// a node-to-node dependency edge.
    pub fn read_in(&self, scope: &mut EvalScope<'_>) -> Result<T> {
        scope.record(DepKey::Node(self.inner.id));
        self.inner.ensure_current(scope.store(), scope.graph())?;
        Ok(self
            .inner
            .value
            .read()
            .expect("value lock poisoned")
            .clone()
            .expect("settled node has a value"))
    }
}

impl<T> DerivedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn ensure_current(&self, store: &Store, graph: &Arc<Graph>) -> Result<()> {
        let state = *self.state.read().expect("state lock poisoned");
        match state {
            NodeState::Settled => Ok(()),
            NodeState::Evaluating => Err(Error::DependencyCycle(self.id)),
            NodeState::Unevaluated | NodeState::Stale => {
                self.evaluate(store, graph).map(|_| ())
            }
        }
    }

    /// Run the computation, rebuild the dependency set, and settle.
    /// Returns whether the output changed.
    fn evaluate(&self, store: &Store, graph: &Arc<Graph>) -> Result<bool> {
        *self.state.write().expect("state lock poisoned") = NodeState::Evaluating;
        graph.enter_eval();

        let mut scope = EvalScope::new(store, graph, self.id);
        let computed = (self.compute)(&mut scope);

        graph.exit_eval();

        let value = match computed {
            Ok(value) => value,
            Err(err) => {
                // Leave the node stale so a later pass can retry.
                *self.state.write().expect("state lock poisoned") = NodeState::Stale;
                return Err(err);
            }
        };

        graph.resubscribe(self.id, scope.into_deps());

        let changed = {
            let mut slot = self.value.write().expect("value lock poisoned");
            let changed = slot.as_ref() != Some(&value);
            *slot = Some(value);
            changed
        };
        *self.state.write().expect("state lock poisoned") = NodeState::Settled;

        if changed {
            trace!(node = self.id.raw(), "output changed, invalidating dependents");
            graph.invalidate(DepKey::Node(self.id));
        }
        Ok(changed)
    }
}

impl<T> ReactiveNode for DerivedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn state(&self) -> NodeState {
        *self.state.read().expect("state lock poisoned")
    }

    fn mark_stale(&self) {
        let mut state = self.state.write().expect("state lock poisoned");
        if *state == NodeState::Settled {
            *state = NodeState::Stale;
        }
    }

    fn reevaluate(&self, store: &Store, graph: &Arc<Graph>) -> Result<bool> {
        if !self.state().needs_evaluation() {
            return Ok(false);
        }
        self.evaluate(store, graph)
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        if let Some(graph) = self.graph.upgrade() {
            graph.unregister(self.id);
        }
    }
}

impl<T> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived").field("id", &self.inner.id).finish()
    }
}

impl EvalScope<'_> {
    /// Read another derived node's output, recording a node edge.
    pub fn get<T>(&mut self, derived: &Derived<T>) -> Result<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        derived.read_in(self)
    }
}
