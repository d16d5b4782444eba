//! Error types for the Weft runtime.
//!
//! The taxonomy distinguishes failures that must be surfaced loudly
//! (isolation violations, exhausted iteration budgets, link resolution
//! failures) from failures the runtime recovers from on its own (commit
//! conflicts, which are retried with fresh reads up to a bound).

use thiserror::Error;

use crate::graph::NodeId;
use crate::store::{CellAddress, EntityId, Path, SpaceId};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All failures the runtime can surface.
#[derive(Debug, Error)]
pub enum Error {
    /// The named space has not been created.
    #[error("space not found: {0}")]
    SpaceNotFound(SpaceId),

    /// The entity does not exist (or no longer exists) in its space.
    #[error("entity not found: {space}/{entity}")]
    EntityNotFound { space: SpaceId, entity: EntityId },

    /// A write addressed a path whose parent does not exist or has the
    /// wrong shape (e.g. indexing into a record).
    #[error("path `{path}` is unreachable in {space}/{entity}")]
    PathUnreachable {
        space: SpaceId,
        entity: EntityId,
        path: Path,
    },

    /// A transaction pinned to one owning space attempted to write into
    /// another. Surfaced immediately; never retried.
    #[error("write isolation violation: transaction owned by space `{owner}` attempted to write into space `{attempted}`")]
    WriteIsolation { owner: SpaceId, attempted: SpaceId },

    /// A read invariant was violated by a concurrent commit before this
    /// transaction committed. Recovered by automatic retry up to a bound.
    #[error("conflict: value at {address} changed before commit")]
    Conflict { address: CellAddress },

    /// The automatic retry budget for a conflicting transaction ran out.
    #[error("transaction retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// A scheduling pass exceeded its evaluation budget. The pass is
    /// abandoned; the runtime itself stays usable.
    #[error("iteration bound exceeded: {evaluations} evaluations in one scheduling pass (bound {bound})")]
    IterationBound { evaluations: usize, bound: usize },

    /// A derived node was re-entered while it was already evaluating.
    #[error("dependency cycle detected at node {0:?}")]
    DependencyCycle(NodeId),

    /// A link points at an entity that does not exist.
    #[error("link target missing: {space}/{entity}")]
    LinkTargetMissing { space: SpaceId, entity: EntityId },

    /// Write capability was requested through a read-only reference
    /// (a copy-mode link, a projection, or a derived output).
    #[error("write capability requested on a read-only reference to {address}")]
    ReadOnlyRef { address: CellAddress },

    /// A handler manifest placed a read-only capability in a write slot.
    /// Raised at bind time, never deferred to invocation.
    #[error("manifest write slot bound to read-only capability for {address}")]
    ReadOnlyBinding { address: CellAddress },

    /// A handler touched a cell its manifest never declared.
    #[error("cell {address} is not declared in the handler manifest")]
    UndeclaredCapability { address: CellAddress },

    /// A handler manifest declared no capabilities at all.
    #[error("handler manifest is empty")]
    EmptyManifest,

    /// An event arrived for a handler that is no longer bound.
    #[error("handler {0} is no longer bound")]
    HandlerUnbound(u64),

    /// A stored value did not match the shape a typed accessor declared.
    #[error("value at {address} does not match the declared shape: {source}")]
    Shape {
        address: CellAddress,
        source: serde_json::Error,
    },

    /// A value could not be encoded for storage.
    #[error("value encoding failed: {0}")]
    ValueEncoding(#[source] serde_json::Error),

    /// A stored value claimed to be a link but did not parse as one.
    #[error("malformed link value: {0}")]
    MalformedLink(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_error_names_both_spaces() {
        let err = Error::WriteIsolation {
            owner: SpaceId::from("alice"),
            attempted: SpaceId::from("bob"),
        };
        let msg = err.to_string();
        assert!(msg.contains("alice"));
        assert!(msg.contains("bob"));
    }

    #[test]
    fn iteration_bound_reports_budget() {
        let err = Error::IterationBound {
            evaluations: 101,
            bound: 100,
        };
        assert!(err.to_string().contains("101"));
        assert!(err.to_string().contains("100"));
    }
}
