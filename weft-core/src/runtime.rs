//! The runtime: one store, one graph, one event queue, one schedule.
//!
//! A `Runtime` is an owned value with an explicit lifecycle — there is
//! no process-wide ambient state. Everything "global" (spaces, the
//! dependency graph, the handler registry, the event queue) lives inside
//! the runtime created at session start and dies with it.
//!
//! # Cooperative schedule
//!
//! All evaluation and handler execution happen on the caller's thread,
//! one unit at a time. Commits enqueue invalidated nodes; handler
//! invocations enqueue events; nothing runs inline with the write that
//! caused it. [`Runtime::settle`] alternates draining the event queue
//! and running bounded scheduling passes until both are quiet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::graph::{self, Derived, EvalScope, Graph, PassSummary};
use crate::handler::{EventQueue, HandlerBinding, HandlerHandle, HandlerId, HandlerScope, Manifest};
use crate::link::Link;
use crate::query::Projection;
use crate::store::{Cell, CellAddress, CellRef, EntityId, Path, SpaceId, Store};
use crate::tx::{CommitReceipt, Transaction};

/// Safety valve for [`Runtime::settle`]: handlers that keep enqueuing
/// work forever get cut off instead of spinning.
const MAX_TURNS_PER_SETTLE: usize = 100;

/// Tunables for a runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Evaluation budget for one scheduling pass. Exceeding it raises
    /// an iteration-bound error rather than hanging on a cycle.
    pub max_evaluations_per_pass: usize,

    /// How many times a conflicting transaction is re-run with fresh
    /// reads before the conflict surfaces to the caller.
    pub max_commit_retries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_evaluations_per_pass: 100,
            max_commit_retries: 5,
        }
    }
}

/// What a [`Runtime::settle`] call did.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettleSummary {
    /// Drain/pass turns taken.
    pub turns: usize,
    /// Handler events processed.
    pub events: usize,
    /// Node evaluations across all passes.
    pub evaluations: usize,
}

/// The coordinating façade over store, graph, and handler queue.
pub struct Runtime {
    store: Store,
    graph: Arc<Graph>,
    config: RuntimeConfig,
    handlers: RwLock<IndexMap<HandlerId, Arc<HandlerBinding>>>,
    events: Arc<EventQueue>,
    next_handler: AtomicU64,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            store: Store::with_max_retries(config.max_commit_retries),
            graph: Arc::new(Graph::new()),
            config,
            handlers: RwLock::new(IndexMap::new()),
            events: Arc::new(EventQueue::default()),
            next_handler: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    // ------------------------------------------------------------------
    // Cell declaration surface
    // ------------------------------------------------------------------

    pub fn create_space(&self, id: impl Into<SpaceId>) -> SpaceId {
        self.store.create_space(id)
    }

    /// Declare a typed entity and get its writable cell handle back.
    /// The read-only accessor form is `cell.read_only()`; there is no
    /// conversion in the other direction.
    pub fn declare<T: Serialize>(
        &self,
        space: impl Into<SpaceId>,
        entity: impl Into<EntityId>,
        default: &T,
        tags: &[&str],
    ) -> Result<Cell<T>> {
        self.store.declare(space, entity, default, tags)
    }

    /// Declare an untyped entity.
    pub fn declare_entity(
        &self,
        space: impl Into<SpaceId>,
        entity: impl Into<EntityId>,
        value: Value,
        tags: &[&str],
    ) -> Result<CellRef> {
        self.store.declare_entity(space, entity, value, tags)
    }

    /// Writable handle to an existing entity's root cell.
    pub fn cell(
        &self,
        space: impl Into<SpaceId>,
        entity: impl Into<EntityId>,
    ) -> Result<CellRef> {
        self.store.cell(space, entity)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Open a transaction owned by one space. Commit it through
    /// [`Runtime::commit`] so dependents get scheduled.
    pub fn begin(&self, owner: impl Into<SpaceId>) -> Transaction {
        self.store.begin(owner)
    }

    /// Commit a transaction and schedule affected derived nodes on the
    /// deferred queue. Nothing re-evaluates inside this call.
    pub fn commit(&self, tx: Transaction) -> Result<CommitReceipt> {
        let receipt = tx.commit()?;
        self.graph.on_commit(&receipt.changed);
        Ok(receipt)
    }

    /// Run a transactional closure with bounded conflict retry, then
    /// schedule affected nodes.
    pub fn transact<T>(
        &self,
        owner: impl Into<SpaceId>,
        f: impl FnMut(&mut Transaction) -> Result<T>,
    ) -> Result<T> {
        let (out, receipt) = self.store.run_transaction(owner, f)?;
        self.graph.on_commit(&receipt.changed);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Derived nodes and scheduling
    // ------------------------------------------------------------------

    /// Create a derived node over this runtime's state.
    pub fn derive<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&mut EvalScope<'_>) -> Result<T> + Send + Sync + 'static,
    {
        Derived::new(self, compute)
    }

    /// Run one scheduling pass over the deferred queue.
    pub fn run_pass(&self) -> Result<PassSummary> {
        graph::run_pass(&self.store, &self.graph, self.config.max_evaluations_per_pass)
    }

    /// Whether any invalidated node is still waiting for a pass.
    pub fn has_pending_work(&self) -> bool {
        self.graph.has_pending() || !self.events.is_empty()
    }

    // ------------------------------------------------------------------
    // Links and queries
    // ------------------------------------------------------------------

    /// Explicitly request a live writable link to a cell. This is the
    /// narrow path to write capability; queries only ever hand out
    /// read-only projections.
    pub fn edit_link(
        &self,
        space: impl Into<SpaceId>,
        entity: impl Into<EntityId>,
        path: Path,
    ) -> Result<Link> {
        let cell = self
            .store
            .cell_at(CellAddress::new(space, entity, path), true)?;
        cell.redirect_link()
    }

    /// Find entities by tag across all spaces. See [`Projection`] for
    /// what the minimal result form does and does not carry.
    pub fn wish(&self, tag: &str) -> Vec<Projection> {
        self.store.wish(tag)
    }

    // ------------------------------------------------------------------
    // Handlers and events
    // ------------------------------------------------------------------

    /// Bind a handler function to its state manifest.
    ///
    /// All capability checking happens here: an empty manifest, a
    /// read-only reference in a write slot, or write slots spanning
    /// spaces all fail now, not at invocation time.
    pub fn bind<F>(&self, manifest: Manifest, f: F) -> Result<HandlerHandle>
    where
        F: Fn(&mut HandlerScope<'_>, &Value) -> Result<()> + Send + Sync + 'static,
    {
        if self.graph.eval_depth() > 0 {
            warn!(
                "handler bound while a node is evaluating; the binding will be \
                 recreated on every re-evaluation"
            );
        }
        let owner = manifest.validate()?;
        let id = self.next_handler.fetch_add(1, Ordering::Relaxed);
        let binding = Arc::new(HandlerBinding {
            id,
            manifest,
            owner,
            func: Box::new(f),
        });
        self.handlers.write().insert(id, binding);
        debug!(handler = id, "handler bound");
        Ok(HandlerHandle {
            id,
            queue: Arc::clone(&self.events),
        })
    }

    /// Remove a binding. Events already queued for it will fail.
    pub fn unbind(&self, handle: &HandlerHandle) -> bool {
        self.handlers.write().shift_remove(&handle.id).is_some()
    }

    /// Process queued handler events one at a time, each in its own
    /// retrying transaction.
    pub fn drain_events(&self) -> Result<usize> {
        let mut handled = 0;
        while let Some(event) = self.events.pop() {
            let binding = self.handlers.read().get(&event.handler).cloned();
            let Some(binding) = binding else {
                return Err(Error::HandlerUnbound(event.handler));
            };
            self.dispatch(&binding, &event.payload)?;
            handled += 1;
        }
        Ok(handled)
    }

    fn dispatch(&self, binding: &HandlerBinding, payload: &Value) -> Result<()> {
        debug!(handler = binding.id, owner = %binding.owner, "invoking handler");
        let ((), receipt) = self.store.run_transaction(binding.owner.clone(), |tx| {
            let mut scope = HandlerScope {
                tx,
                manifest: &binding.manifest,
            };
            (binding.func)(&mut scope, payload)
        })?;
        self.graph.on_commit(&receipt.changed);
        Ok(())
    }

    /// Alternate event draining and scheduling passes until both are
    /// quiet. Each pass is individually bounded; the outer loop has its
    /// own turn bound against handlers that enqueue forever.
    pub fn settle(&self) -> Result<SettleSummary> {
        let mut summary = SettleSummary::default();
        loop {
            let events = self.drain_events()?;
            let pass = self.run_pass()?;
            summary.turns += 1;
            summary.events += events;
            summary.evaluations += pass.evaluations;

            if events == 0 && pass.evaluations == 0 && !self.has_pending_work() {
                return Ok(summary);
            }
            if summary.turns >= MAX_TURNS_PER_SETTLE {
                return Err(Error::IterationBound {
                    evaluations: summary.evaluations,
                    bound: MAX_TURNS_PER_SETTLE,
                });
            }
        }
    }

    /// Read a typed cell value outside any tracking or transaction.
    pub fn peek<T: DeserializeOwned>(&self, cell: &Cell<T>) -> Result<T> {
        cell.read()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
