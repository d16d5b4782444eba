//! Weft Core
//!
//! This crate provides the core runtime for the Weft reactive state
//! engine. It implements:
//!
//! - Versioned, addressable state cells grouped into owned spaces
//! - Serializable links between cells, with alias and copy semantics
//! - Identity-scoped transactions with conflict detection and retry
//! - A fine-grained dependency graph with deferred, bounded scheduling
//! - An event-driven handler runtime with explicit state manifests
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `store`: spaces, entities, cells, and path navigation
//! - `link`: serializable cross-space references and their resolution
//! - `tx`: the transaction model (reads as invariants, buffered writes)
//! - `graph`: dependency tracking and the deferred scheduler
//! - `handler`: manifest-bound event handlers and the event queue
//! - `runtime`: the façade owning all of the above
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::{Manifest, Runtime};
//!
//! let rt = Runtime::new();
//! rt.create_space("home");
//! let count = rt.declare("home", "count", &0i64, &[])?;
//!
//! // A derived value over the cell.
//! let read = count.read_only();
//! let doubled = rt.derive(move |scope| Ok(scope.read::<i64, _>(&read)? * 2));
//!
//! // Mutation goes through a transaction; dependents re-evaluate on
//! // the next scheduling pass, never inline.
//! rt.transact("home", |tx| tx.write_cell(&count, &5))?;
//! rt.settle()?;
//! assert_eq!(doubled.get(&rt)?, 10);
//! ```

pub mod error;
pub mod graph;
pub mod handler;
pub mod link;
pub mod query;
pub mod select;
pub mod store;
pub mod tx;

mod runtime;

pub use error::{Error, Result};
pub use graph::{Derived, EvalScope, NodeId, NodeState, PassSummary};
pub use handler::{HandlerHandle, HandlerId, HandlerScope, Manifest};
pub use link::{Link, LinkMode};
pub use query::Projection;
pub use runtime::{Runtime, RuntimeConfig, SettleSummary};
pub use select::best_by_score;
pub use store::{
    Cell, CellAddress, CellKey, CellRef, EntityId, Path, PathSegment, ReadCell, ReadableCell,
    SpaceId, Store,
};
pub use tx::{CommitReceipt, Transaction};
