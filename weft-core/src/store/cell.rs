//! Cell identity and cell handles.
//!
//! A cell is an addressable, versioned slot inside an entity's value tree.
//! Its identity is the (owning space, entity id, path) triple. Handles come
//! in an untyped form ([`CellRef`]) and two structurally distinct typed
//! forms: [`Cell`] (writable) and [`ReadCell`] (read-only). There is no
//! conversion from the read-only form back to the writable one.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::path::{Path, PathSegment};
use crate::store::space::Store;

/// Identity of an owning space. Spaces are the unit of write authority.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(String);

impl SpaceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SpaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SpaceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical id of a top-level entity within a space.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full address of a cell: owning space, entity, and path within it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    pub space: SpaceId,
    pub entity: EntityId,
    pub path: Path,
}

impl CellAddress {
    pub fn new(space: impl Into<SpaceId>, entity: impl Into<EntityId>, path: Path) -> Self {
        Self {
            space: space.into(),
            entity: entity.into(),
            path,
        }
    }

    /// Address of the entity root this address lives under.
    pub fn entity_root(&self) -> CellAddress {
        CellAddress {
            space: self.space.clone(),
            entity: self.entity.clone(),
            path: Path::root(),
        }
    }

    /// True if a write at `written` is observable through this address.
    pub fn affected_by(&self, written: &CellAddress) -> bool {
        self.space == written.space
            && self.entity == written.entity
            && self.path.overlaps(&written.path)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.space, self.entity, self.path)
    }
}

/// Subscription identity of a cell.
///
/// Keys are assigned by interning addresses in the store, so two handles
/// for the same address always carry the same key, no matter how they were
/// navigated to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey(pub(crate) u64);

impl CellKey {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Untyped handle to a cell.
///
/// Equality and hashing follow the cell's address, not the handle itself:
/// two refs reached through different navigation routes compare equal when
/// they address the same slot.
#[derive(Clone)]
pub struct CellRef {
    pub(crate) store: Store,
    pub(crate) address: CellAddress,
    pub(crate) key: CellKey,
    pub(crate) writable: bool,
}

impl CellRef {
    pub fn address(&self) -> &CellAddress {
        &self.address
    }

    pub fn key(&self) -> CellKey {
        self.key
    }

    pub fn space(&self) -> &SpaceId {
        &self.address.space
    }

    pub fn entity(&self) -> &EntityId {
        &self.address.entity
    }

    pub fn path(&self) -> &Path {
        &self.address.path
    }

    /// Whether writes may be issued through this handle.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Snapshot of the current value. The returned value is a clone;
    /// mutating it never touches the store.
    pub fn read(&self) -> Result<Value> {
        self.store.read(&self.address)
    }

    /// Version of the owning entity, bumped on every committed write.
    pub fn version(&self) -> Result<u64> {
        self.store.version(&self.address)
    }

    /// Navigate into a child slot. Memoized by the store's interning
    /// table: repeated navigation yields a handle with the same key.
    pub fn navigate(&self, segment: impl Into<PathSegment>) -> CellRef {
        self.store.navigate(self, segment.into())
    }

    /// Downgrade to a read-only handle.
    pub fn read_only(&self) -> CellRef {
        CellRef {
            writable: false,
            ..self.clone()
        }
    }

    /// Attach a shape to this handle, keeping write capability.
    ///
    /// Fails if the handle itself is read-only; a read-only ref can only
    /// become a [`ReadCell`].
    pub fn into_cell<T>(self) -> Result<Cell<T>> {
        if !self.writable {
            return Err(Error::ReadOnlyRef {
                address: self.address,
            });
        }
        Ok(Cell {
            raw: self,
            _shape: PhantomData,
        })
    }

    /// Attach a shape to this handle as a read-only accessor.
    pub fn into_read_cell<T>(self) -> ReadCell<T> {
        ReadCell {
            raw: self.read_only(),
            _shape: PhantomData,
        }
    }
}

impl PartialEq for CellRef {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for CellRef {}

impl std::hash::Hash for CellRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Debug for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellRef")
            .field("address", &self.address)
            .field("key", &self.key)
            .field("writable", &self.writable)
            .finish()
    }
}

/// Writable, shape-typed handle to a cell.
///
/// Writes go through a transaction; the handle itself only proves the
/// capability and carries the declared shape.
pub struct Cell<T> {
    pub(crate) raw: CellRef,
    _shape: PhantomData<fn() -> T>,
}

impl<T> Cell<T> {
    pub(crate) fn from_raw(raw: CellRef) -> Self {
        Self {
            raw,
            _shape: PhantomData,
        }
    }

    pub fn raw(&self) -> &CellRef {
        &self.raw
    }

    pub fn address(&self) -> &CellAddress {
        &self.raw.address
    }

    pub fn key(&self) -> CellKey {
        self.raw.key
    }

    /// The read-only accessor form of this cell. There is no way back.
    pub fn read_only(&self) -> ReadCell<T> {
        self.raw.clone().into_read_cell()
    }
}

impl<T: DeserializeOwned> Cell<T> {
    /// Untracked snapshot read, decoded into the declared shape.
    pub fn read(&self) -> Result<T> {
        decode(&self.raw)
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _shape: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell").field("address", &self.raw.address).finish()
    }
}

/// Read-only, shape-typed accessor for a cell.
pub struct ReadCell<T> {
    pub(crate) raw: CellRef,
    _shape: PhantomData<fn() -> T>,
}

impl<T> ReadCell<T> {
    pub fn raw(&self) -> &CellRef {
        &self.raw
    }

    pub fn address(&self) -> &CellAddress {
        &self.raw.address
    }

    pub fn key(&self) -> CellKey {
        self.raw.key
    }
}

impl<T: DeserializeOwned> ReadCell<T> {
    /// Untracked snapshot read, decoded into the declared shape.
    pub fn read(&self) -> Result<T> {
        decode(&self.raw)
    }
}

impl<T> Clone for ReadCell<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _shape: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ReadCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadCell")
            .field("address", &self.raw.address)
            .finish()
    }
}

/// Anything that can stand in for a readable cell of shape `T`.
///
/// Both handle forms are readable; only [`Cell`] is writable. Read APIs
/// across the crate accept either through this trait.
pub trait ReadableCell<T> {
    fn as_raw(&self) -> &CellRef;
}

impl<T> ReadableCell<T> for Cell<T> {
    fn as_raw(&self) -> &CellRef {
        &self.raw
    }
}

impl<T> ReadableCell<T> for ReadCell<T> {
    fn as_raw(&self) -> &CellRef {
        &self.raw
    }
}

fn decode<T: DeserializeOwned>(raw: &CellRef) -> Result<T> {
    let value = raw.read()?;
    decode_value(&raw.address, value)
}

/// Decode a stored value into a declared shape, attributing failures to
/// the cell the value came from.
pub(crate) fn decode_value<T: DeserializeOwned>(address: &CellAddress, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|source| Error::Shape {
        address: address.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_display_with_path() {
        let addr = CellAddress::new("home", "list", Path::parse(&["items", "0"]));
        assert_eq!(addr.to_string(), "home/list/items/0");
    }

    #[test]
    fn affected_by_covers_ancestors_and_descendants() {
        let parent = CellAddress::new("home", "list", Path::parse(&["items"]));
        let child = CellAddress::new("home", "list", Path::parse(&["items", "2"]));
        let sibling = CellAddress::new("home", "list", Path::parse(&["title"]));

        assert!(parent.affected_by(&child));
        assert!(child.affected_by(&parent));
        assert!(!sibling.affected_by(&parent));

        let other_entity = CellAddress::new("home", "other", Path::parse(&["items"]));
        assert!(!parent.affected_by(&other_entity));
    }
}
