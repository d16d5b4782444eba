//! Event handlers: explicit state manifests, deferred invocation.
//!
//! A handler is a function paired with a manifest — the explicit list of
//! cells it may read and write. Binding happens once, at composition
//! time; invocation happens later, one queued event at a time, each
//! inside its own transaction scoped to the manifest's owning space.
//!
//! The manifest is the capture list. Handlers never close over live
//! reactive values: what a handler sees is what it reads through its
//! scope *during the invocation*, so a cell mutated after binding reads
//! as its current value, not a stale bind-time snapshot.
//!
//! Capability checks are front-loaded. A read-only reference in a write
//! slot fails at bind time, as does a manifest whose write slots span
//! more than one owning space — never silently at invocation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::store::{Cell, CellAddress, CellRef, ReadableCell, SpaceId};
use crate::tx::Transaction;

/// Identifier for a bound handler.
pub type HandlerId = u64;

/// Which kind of access a manifest entry grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Read,
    Write,
}

#[derive(Debug, Clone)]
struct Capability {
    address: CellAddress,
    slot: Slot,
    /// Whether the reference the entry was built from carries write
    /// capability. Checked against the slot at bind time.
    writable: bool,
}

/// The explicit state-access list a handler is bound with.
///
/// Built at the call site that declares the handler. The manifest's
/// shape is part of the binding; build it once, not per iteration.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    caps: Vec<Capability>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant read access to a typed cell (either handle form).
    pub fn reads<T>(mut self, cell: &impl ReadableCell<T>) -> Self {
        self.push(cell.as_raw(), Slot::Read);
        self
    }

    /// Grant read access to an untyped reference.
    pub fn reads_ref(mut self, cell: &CellRef) -> Self {
        self.push(cell, Slot::Read);
        self
    }

    /// Grant write access to a typed writable cell.
    ///
    /// Only [`Cell`] fits here; read-only accessors and derived outputs
    /// have no writable form to offer.
    pub fn writes<T>(mut self, cell: &Cell<T>) -> Self {
        self.push(cell.raw(), Slot::Write);
        self
    }

    /// Grant write access through an untyped reference. If the
    /// reference is read-only (a resolved copy link, a projection),
    /// binding will fail.
    pub fn writes_ref(mut self, cell: &CellRef) -> Self {
        self.push(cell, Slot::Write);
        self
    }

    fn push(&mut self, cell: &CellRef, slot: Slot) {
        self.caps.push(Capability {
            address: cell.address().clone(),
            slot,
            writable: cell.is_writable(),
        });
    }

    /// Check the manifest and determine the owning space for the
    /// per-invocation transaction.
    pub(crate) fn validate(&self) -> Result<SpaceId> {
        if self.caps.is_empty() {
            return Err(Error::EmptyManifest);
        }

        let mut owner: Option<SpaceId> = None;
        for cap in &self.caps {
            if cap.slot != Slot::Write {
                continue;
            }
            if !cap.writable {
                return Err(Error::ReadOnlyBinding {
                    address: cap.address.clone(),
                });
            }
            match &owner {
                None => owner = Some(cap.address.space.clone()),
                Some(existing) if *existing != cap.address.space => {
                    return Err(Error::WriteIsolation {
                        owner: existing.clone(),
                        attempted: cap.address.space.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        // Read-only handlers are scoped to the first capability's space.
        Ok(owner.unwrap_or_else(|| self.caps[0].address.space.clone()))
    }

    fn allows_read(&self, address: &CellAddress) -> bool {
        self.caps.iter().any(|cap| &cap.address == address)
    }

    fn allows_write(&self, address: &CellAddress) -> bool {
        self.caps
            .iter()
            .any(|cap| cap.slot == Slot::Write && &cap.address == address)
    }
}

pub(crate) type HandlerFn =
    Box<dyn Fn(&mut HandlerScope<'_>, &Value) -> Result<()> + Send + Sync>;

/// A bound handler: function, manifest, and owning space.
pub(crate) struct HandlerBinding {
    pub(crate) id: HandlerId,
    pub(crate) manifest: Manifest,
    pub(crate) owner: SpaceId,
    pub(crate) func: HandlerFn,
}

/// A queued invocation.
pub(crate) struct Event {
    pub(crate) handler: HandlerId,
    pub(crate) payload: Value,
}

/// The runtime's deferred event queue. Invoking a handle pushes here;
/// nothing runs until the runtime drains it.
#[derive(Default)]
pub(crate) struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub(crate) fn push(&self, event: Event) {
        self.inner.lock().push_back(event);
    }

    pub(crate) fn pop(&self) -> Option<Event> {
        self.inner.lock().pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Invocable handle returned by binding a handler.
///
/// Invoking enqueues an event; handlers run when the runtime drains the
/// queue, never inline.
#[derive(Clone)]
pub struct HandlerHandle {
    pub(crate) id: HandlerId,
    pub(crate) queue: Arc<EventQueue>,
}

impl HandlerHandle {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Enqueue an invocation with a payload.
    pub fn invoke(&self, payload: Value) {
        trace!(handler = self.id, "event enqueued");
        self.queue.push(Event {
            handler: self.id,
            payload,
        });
    }
}

impl fmt::Debug for HandlerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerHandle").field("id", &self.id).finish()
    }
}

/// The state access a handler gets during one invocation.
///
/// Every operation is checked against the manifest and routed through
/// the invocation's transaction, so reads become commit invariants and
/// writes stay buffered until commit.
pub struct HandlerScope<'a> {
    pub(crate) tx: &'a mut Transaction,
    pub(crate) manifest: &'a Manifest,
}

impl HandlerScope<'_> {
    /// Read a manifested cell's *current* value.
    pub fn read<T, C>(&mut self, cell: &C) -> Result<T>
    where
        T: DeserializeOwned,
        C: ReadableCell<T>,
    {
        self.check_read(cell.as_raw().address())?;
        self.tx.read_as(cell)
    }

    /// Read a manifested cell's raw value.
    pub fn read_value(&mut self, cell: &CellRef) -> Result<Value> {
        self.check_read(cell.address())?;
        self.tx.read_ref(cell)
    }

    /// Write a manifested cell.
    pub fn write<T: Serialize>(&mut self, cell: &Cell<T>, value: &T) -> Result<()> {
        self.check_write(cell.address())?;
        self.tx.write_cell(cell, value)
    }

    /// Write a manifested cell's raw value.
    pub fn write_value(&mut self, cell: &CellRef, value: Value) -> Result<()> {
        self.check_write(cell.address())?;
        self.tx.write_ref(cell, value)
    }

    fn check_read(&self, address: &CellAddress) -> Result<()> {
        if self.manifest.allows_read(address) {
            Ok(())
        } else {
            Err(Error::UndeclaredCapability {
                address: address.clone(),
            })
        }
    }

    fn check_write(&self, address: &CellAddress) -> Result<()> {
        if self.manifest.allows_write(address) {
            Ok(())
        } else {
            Err(Error::UndeclaredCapability {
                address: address.clone(),
            })
        }
    }
}
