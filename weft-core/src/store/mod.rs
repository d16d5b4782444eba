//! Versioned, addressable state storage.
//!
//! This module implements the state store underneath the reactive engine:
//!
//! - Spaces: named owners of state, each the unit of write authority
//! - Entities: top-level named values inside a space, individually
//!   versioned and optionally tagged for queries
//! - Cells: addressable slots inside an entity value, reached by path
//!   navigation
//!
//! # Identity
//!
//! A cell's identity is its (space, entity, path) address. The store
//! interns addresses into `CellKey`s, so any two handles for the same
//! address share one subscription identity regardless of how they were
//! obtained. This is what makes "read works, write works, updates fire"
//! hold across navigation routes.
//!
//! # Snapshots
//!
//! Reads return cloned values. There is no way to mutate stored state
//! through a read; all writes go through a transaction and become visible
//! atomically at commit.

mod cell;
mod path;
mod space;

pub use cell::{Cell, CellAddress, CellKey, CellRef, EntityId, ReadCell, ReadableCell, SpaceId};
pub use path::{Path, PathSegment};
pub use space::Store;

pub(crate) use cell::decode_value;
