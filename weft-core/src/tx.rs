//! Identity-scoped transactions.
//!
//! A transaction batches reads and writes into one atomic unit owned by a
//! single space. Every successful read becomes an invariant: if the value
//! it returned changes before commit, the commit fails with a conflict
//! and the whole transaction is re-run with fresh reads, up to a bound.
//!
//! Write authority is pinned to the owning space at open. Writing into
//! any other space is a write-isolation violation, surfaced immediately
//! and never retried: cross-space updates use the two-phase pattern
//! instead (read everything first, then one commit per owning space, in
//! sequence). That pattern is best-effort sequential, not a single ACID
//! unit — if a later commit fails, earlier commits stay applied.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::{Cell, CellAddress, CellKey, CellRef, ReadableCell, SpaceId, Store};

/// Outcome of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub tx_id: u64,
    /// Addresses written, in write order.
    pub written: Vec<CellAddress>,
    /// Subscription keys whose cells are observably changed, sorted.
    pub changed: Vec<CellKey>,
}

/// An open transaction. Dropping it without committing aborts it.
pub struct Transaction {
    id: u64,
    store: Store,
    owner: SpaceId,
    reads: Vec<(CellAddress, Value)>,
    read_index: HashSet<CellAddress>,
    writes: Vec<(CellAddress, Value)>,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The single space this transaction may write into.
    pub fn owner(&self) -> &SpaceId {
        &self.owner
    }

    /// Read a value, recording it as a commit invariant.
    ///
    /// Reads see this transaction's own pending write for the exact same
    /// address; otherwise they see the live store.
    pub fn read(&mut self, address: &CellAddress) -> Result<Value> {
        if let Some((_, pending)) = self
            .writes
            .iter()
            .rev()
            .find(|(written, _)| written == address)
        {
            return Ok(pending.clone());
        }

        let value = self.store.read(address)?;
        if self.read_index.insert(address.clone()) {
            self.reads.push((address.clone(), value.clone()));
        }
        Ok(value)
    }

    /// Read through an untyped handle.
    pub fn read_ref(&mut self, cell: &CellRef) -> Result<Value> {
        self.read(cell.address())
    }

    /// Read through a typed handle (writable or read-only).
    pub fn read_as<T, C>(&mut self, cell: &C) -> Result<T>
    where
        T: DeserializeOwned,
        C: ReadableCell<T>,
    {
        let raw = cell.as_raw();
        let value = self.read(raw.address())?;
        crate::store::decode_value(raw.address(), value)
    }

    /// Buffer a write. Fails immediately if the address belongs to a
    /// space other than the owner.
    pub fn write(&mut self, address: CellAddress, value: Value) -> Result<()> {
        if address.space != self.owner {
            return Err(Error::WriteIsolation {
                owner: self.owner.clone(),
                attempted: address.space,
            });
        }
        if let Some(existing) = self.writes.iter_mut().find(|(a, _)| *a == address) {
            existing.1 = value;
        } else {
            self.writes.push((address, value));
        }
        Ok(())
    }

    /// Write through an untyped handle, honoring its capability.
    pub fn write_ref(&mut self, cell: &CellRef, value: Value) -> Result<()> {
        if !cell.is_writable() {
            return Err(Error::ReadOnlyRef {
                address: cell.address().clone(),
            });
        }
        self.write(cell.address().clone(), value)
    }

    /// Write through a typed handle.
    pub fn write_cell<T: Serialize>(&mut self, cell: &Cell<T>, value: &T) -> Result<()> {
        let encoded = serde_json::to_value(value).map_err(Error::ValueEncoding)?;
        self.write(cell.address().clone(), encoded)
    }

    /// Validate all read invariants and apply all writes atomically.
    pub fn commit(self) -> Result<CommitReceipt> {
        let changed = self
            .store
            .validate_and_apply(self.id, &self.reads, &self.writes)?;
        Ok(CommitReceipt {
            tx_id: self.id,
            written: self.writes.into_iter().map(|(a, _)| a).collect(),
            changed,
        })
    }
}

impl Store {
    /// Open a transaction owned by one space.
    pub fn begin(&self, owner: impl Into<SpaceId>) -> Transaction {
        Transaction {
            id: self.next_tx_id(),
            store: self.clone(),
            owner: owner.into(),
            reads: Vec::new(),
            read_index: HashSet::new(),
            writes: Vec::new(),
        }
    }

    /// Run a transactional closure with bounded automatic retry.
    ///
    /// On conflict the closure runs again against a fresh transaction
    /// with fresh reads, so it must be a pure function of its
    /// transactional reads. Non-conflict errors propagate immediately.
    pub fn run_transaction<T>(
        &self,
        owner: impl Into<SpaceId>,
        mut f: impl FnMut(&mut Transaction) -> Result<T>,
    ) -> Result<(T, CommitReceipt)> {
        let owner = owner.into();
        let max_retries = self.max_retries();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut tx = self.begin(owner.clone());
            let out = f(&mut tx)?;
            match tx.commit() {
                Ok(receipt) => return Ok((out, receipt)),
                Err(Error::Conflict { address }) => {
                    if attempts > max_retries {
                        warn!(attempts, %address, "transaction retry budget exhausted");
                        return Err(Error::RetriesExhausted { attempts });
                    }
                    debug!(attempt = attempts, %address, "commit conflict, retrying with fresh reads");
                }
                Err(other) => return Err(other),
            }
        }
    }
}
