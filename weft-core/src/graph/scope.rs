//! The read scope handed to a derived node's computation.
//!
//! Dependency tracking is explicit: the computation receives an
//! [`EvalScope`] and every read goes through it. There are no proxy
//! traps and no ambient tracking context — what the scope saw is exactly
//! the node's dependency set for this evaluation.
//!
//! The scope offers no write operations. Derived computations are pure
//! functions over cell reads; mutation belongs to transactions and
//! handlers.

use std::sync::Arc;

use indexmap::IndexSet;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::error::Result;
use crate::graph::node::{DepKey, NodeId};
use crate::graph::registry::Graph;
use crate::store::{CellRef, PathSegment, ReadableCell, Store};

/// Records which cells and nodes one evaluation actually read.
pub struct EvalScope<'a> {
    store: &'a Store,
    graph: &'a Arc<Graph>,
    node: NodeId,
    deps: IndexSet<DepKey>,
}

impl<'a> EvalScope<'a> {
    pub(crate) fn new(store: &'a Store, graph: &'a Arc<Graph>, node: NodeId) -> Self {
        Self {
            store,
            graph,
            node,
            deps: IndexSet::new(),
        }
    }

    /// The node this scope is evaluating for.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Read a cell's raw value, recording the dependency.
    ///
    /// Only reads that actually execute are recorded. A read behind an
    /// early return never becomes a dependency, so computations should
    /// read everything they may need near the top of the body.
    pub fn value(&mut self, cell: &CellRef) -> Result<Value> {
        self.record(DepKey::Cell(cell.key()));
        cell.read()
    }

    /// Read a typed cell (writable or read-only form), recording the
    /// dependency.
    pub fn read<T, C>(&mut self, cell: &C) -> Result<T>
    where
        T: DeserializeOwned,
        C: ReadableCell<T>,
    {
        let raw = cell.as_raw();
        self.record(DepKey::Cell(raw.key()));
        let value = raw.read()?;
        crate::store::decode_value(raw.address(), value)
    }

    /// Navigate without reading. Navigation alone records nothing; the
    /// dependency appears when the resulting cell is read.
    pub fn navigate(&self, cell: &CellRef, segment: impl Into<PathSegment>) -> CellRef {
        cell.navigate(segment)
    }

    pub(crate) fn record(&mut self, key: DepKey) {
        if self.deps.insert(key) {
            trace!(node = self.node.raw(), ?key, "dependency recorded");
        }
    }

    pub(crate) fn store(&self) -> &'a Store {
        self.store
    }

    pub(crate) fn graph(&self) -> &'a Arc<Graph> {
        self.graph
    }

    pub(crate) fn into_deps(self) -> IndexSet<DepKey> {
        self.deps
    }
}
