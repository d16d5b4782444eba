//! The state store: spaces, entities, and versioned cell storage.
//!
//! A space is the unit of write authority. Each space holds named
//! entities; each entity is one structured value plus a version counter
//! and an optional tag set used by the query interface. Cells address
//! into entity values by path.
//!
//! Reads hand out clones — logically immutable snapshots. All mutation
//! goes through a transaction, which validates its read invariants and
//! applies its writes under one write lock so dependents never observe a
//! partial commit.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::cell::{Cell, CellAddress, CellKey, CellRef, EntityId, SpaceId};
use crate::store::path::{self, Path, PathSegment};

const DEFAULT_MAX_COMMIT_RETRIES: u32 = 5;

/// One entity's stored state.
#[derive(Debug)]
struct Document {
    value: Value,
    version: u64,
    tags: BTreeSet<String>,
}

/// All entities of one space, in declaration order.
#[derive(Debug, Default)]
struct SpaceState {
    entities: IndexMap<EntityId, Document>,
}

pub(crate) struct StoreInner {
    spaces: RwLock<IndexMap<SpaceId, SpaceState>>,

    /// Interning table assigning each distinct address its subscription
    /// identity. Navigation goes through here, which is what makes
    /// repeated navigation yield the same key.
    intern: DashMap<CellAddress, CellKey>,

    next_key: AtomicU64,
    next_tx: AtomicU64,
    max_retries: u32,
}

/// Handle to the state store. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self::with_max_retries(DEFAULT_MAX_COMMIT_RETRIES)
    }

    pub(crate) fn with_max_retries(max_retries: u32) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                spaces: RwLock::new(IndexMap::new()),
                intern: DashMap::new(),
                next_key: AtomicU64::new(0),
                next_tx: AtomicU64::new(0),
                max_retries,
            }),
        }
    }

    pub(crate) fn max_retries(&self) -> u32 {
        self.inner.max_retries
    }

    pub(crate) fn next_tx_id(&self) -> u64 {
        self.inner.next_tx.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a space. Creating an existing space is a no-op.
    pub fn create_space(&self, id: impl Into<SpaceId>) -> SpaceId {
        let id = id.into();
        self.inner
            .spaces
            .write()
            .entry(id.clone())
            .or_insert_with(SpaceState::default);
        id
    }

    pub fn has_space(&self, id: &SpaceId) -> bool {
        self.inner.spaces.read().contains_key(id)
    }

    /// Declare a top-level entity with its initial value and tags.
    /// Re-declaring replaces the stored value and resets the version.
    pub fn declare_entity(
        &self,
        space: impl Into<SpaceId>,
        entity: impl Into<EntityId>,
        value: Value,
        tags: &[&str],
    ) -> Result<CellRef> {
        let space = space.into();
        let entity = entity.into();
        {
            let mut spaces = self.inner.spaces.write();
            let state = spaces
                .get_mut(&space)
                .ok_or_else(|| Error::SpaceNotFound(space.clone()))?;
            state.entities.insert(
                entity.clone(),
                Document {
                    value,
                    version: 0,
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                },
            );
        }
        let address = CellAddress::new(space, entity, Path::root());
        let key = self.intern(&address);
        Ok(CellRef {
            store: self.clone(),
            address,
            key,
            writable: true,
        })
    }

    /// Declare an entity whose shape is a serializable Rust type.
    pub fn declare<T: Serialize>(
        &self,
        space: impl Into<SpaceId>,
        entity: impl Into<EntityId>,
        default: &T,
        tags: &[&str],
    ) -> Result<Cell<T>> {
        let value = serde_json::to_value(default).map_err(Error::ValueEncoding)?;
        let raw = self.declare_entity(space, entity, value, tags)?;
        raw.into_cell()
    }

    /// Tear an entity down. Its interned keys stay allocated; reads
    /// through stale handles fail with `EntityNotFound`.
    pub fn remove_entity(&self, space: &SpaceId, entity: &EntityId) -> Result<()> {
        let mut spaces = self.inner.spaces.write();
        let state = spaces
            .get_mut(space)
            .ok_or_else(|| Error::SpaceNotFound(space.clone()))?;
        state
            .entities
            .shift_remove(entity)
            .ok_or_else(|| Error::EntityNotFound {
                space: space.clone(),
                entity: entity.clone(),
            })?;
        Ok(())
    }

    /// Writable handle to an entity's root cell.
    pub fn cell(&self, space: impl Into<SpaceId>, entity: impl Into<EntityId>) -> Result<CellRef> {
        let address = CellAddress::new(space, entity, Path::root());
        self.cell_at(address, true)
    }

    /// Handle for an arbitrary address, checking the entity exists.
    pub(crate) fn cell_at(&self, address: CellAddress, writable: bool) -> Result<CellRef> {
        if !self.entity_exists(&address.space, &address.entity)? {
            return Err(Error::EntityNotFound {
                space: address.space,
                entity: address.entity,
            });
        }
        let key = self.intern(&address);
        Ok(CellRef {
            store: self.clone(),
            address,
            key,
            writable,
        })
    }

    fn entity_exists(&self, space: &SpaceId, entity: &EntityId) -> Result<bool> {
        let spaces = self.inner.spaces.read();
        let state = spaces
            .get(space)
            .ok_or_else(|| Error::SpaceNotFound(space.clone()))?;
        Ok(state.entities.contains_key(entity))
    }

    /// Snapshot read. Missing paths inside an existing entity read as
    /// `Null`; a missing entity is an error.
    pub fn read(&self, address: &CellAddress) -> Result<Value> {
        let spaces = self.inner.spaces.read();
        let doc = Self::document(&spaces, address)?;
        Ok(path::value_at(&doc.value, &address.path)
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Current version of the entity the address lives in.
    pub fn version(&self, address: &CellAddress) -> Result<u64> {
        let spaces = self.inner.spaces.read();
        Ok(Self::document(&spaces, address)?.version)
    }

    fn document<'a>(
        spaces: &'a IndexMap<SpaceId, SpaceState>,
        address: &CellAddress,
    ) -> Result<&'a Document> {
        let state = spaces
            .get(&address.space)
            .ok_or_else(|| Error::SpaceNotFound(address.space.clone()))?;
        state
            .entities
            .get(&address.entity)
            .ok_or_else(|| Error::EntityNotFound {
                space: address.space.clone(),
                entity: address.entity.clone(),
            })
    }

    /// Navigate into a child cell. Goes through the interning table, so
    /// the result has a stable key for its address.
    pub fn navigate(&self, parent: &CellRef, segment: PathSegment) -> CellRef {
        let address = CellAddress {
            space: parent.address.space.clone(),
            entity: parent.address.entity.clone(),
            path: parent.address.path.join(segment),
        };
        let key = self.intern(&address);
        CellRef {
            store: self.clone(),
            address,
            key,
            writable: parent.writable,
        }
    }

    /// Subscription identity for an address.
    pub(crate) fn intern(&self, address: &CellAddress) -> CellKey {
        if let Some(key) = self.inner.intern.get(address) {
            return *key;
        }
        *self
            .inner
            .intern
            .entry(address.clone())
            .or_insert_with(|| CellKey(self.inner.next_key.fetch_add(1, Ordering::Relaxed)))
    }

    /// Every interned key whose address overlaps one of the written
    /// addresses, sorted for deterministic downstream scheduling.
    pub(crate) fn affected_keys(&self, written: &[CellAddress]) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = self
            .inner
            .intern
            .iter()
            .filter(|entry| written.iter().any(|w| entry.key().affected_by(w)))
            .map(|entry| *entry.value())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Validate a transaction's read invariants and apply its writes.
    ///
    /// Everything happens under one write lock: no reader observes a
    /// half-applied commit. Writes are staged against cloned entity
    /// values first so a failing write leaves the store untouched.
    pub(crate) fn validate_and_apply(
        &self,
        tx_id: u64,
        reads: &[(CellAddress, Value)],
        writes: &[(CellAddress, Value)],
    ) -> Result<Vec<CellKey>> {
        let mut spaces = self.inner.spaces.write();

        for (address, snapshot) in reads {
            let current = match Self::document(&spaces, address) {
                Ok(doc) => path::value_at(&doc.value, &address.path)
                    .cloned()
                    .unwrap_or(Value::Null),
                // The entity the invariant was read from is gone.
                Err(_) => {
                    return Err(Error::Conflict {
                        address: address.clone(),
                    })
                }
            };
            if &current != snapshot {
                return Err(Error::Conflict {
                    address: address.clone(),
                });
            }
        }

        // Stage all writes against clones, then swap them in.
        let mut staged: IndexMap<(SpaceId, EntityId), Value> = IndexMap::new();
        for (address, value) in writes {
            let entity = (address.space.clone(), address.entity.clone());
            if !staged.contains_key(&entity) {
                let doc = Self::document(&spaces, address)?;
                staged.insert(entity.clone(), doc.value.clone());
            }
            let root = staged.get_mut(&entity).expect("staged entry just inserted");
            if !path::set_value_at(root, &address.path, value.clone()) {
                return Err(Error::PathUnreachable {
                    space: address.space.clone(),
                    entity: address.entity.clone(),
                    path: address.path.clone(),
                });
            }
        }

        let mut touched: IndexSet<(SpaceId, EntityId)> = IndexSet::new();
        for ((space, entity), value) in staged {
            let state = spaces.get_mut(&space).expect("space checked during staging");
            let doc = state
                .entities
                .get_mut(&entity)
                .expect("entity checked during staging");
            doc.value = value;
            doc.version += 1;
            touched.insert((space, entity));
        }
        drop(spaces);

        let written: Vec<CellAddress> = writes.iter().map(|(a, _)| a.clone()).collect();
        let changed = self.affected_keys(&written);
        debug!(
            tx = tx_id,
            writes = written.len(),
            entities = touched.len(),
            affected = changed.len(),
            "transaction committed"
        );
        Ok(changed)
    }

    /// Entities carrying a tag, with a snapshot of their values, in
    /// declaration order across spaces.
    pub(crate) fn snapshot_tagged(&self, tag: &str) -> Vec<(SpaceId, EntityId, Value)> {
        let spaces = self.inner.spaces.read();
        let mut out = Vec::new();
        for (space_id, state) in spaces.iter() {
            for (entity_id, doc) in state.entities.iter() {
                if doc.tags.contains(tag) {
                    out.push((space_id.clone(), entity_id.clone(), doc.value.clone()));
                }
            }
        }
        out
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_list() -> (Store, CellRef) {
        let store = Store::new();
        store.create_space("home");
        let root = store
            .declare_entity("home", "list", json!({"items": [1, 2, 3]}), &[])
            .unwrap();
        (store, root)
    }

    #[test]
    fn navigate_is_memoized_per_address() {
        let (_store, root) = store_with_list();

        let a = root.navigate("items").navigate(1usize);
        let b = root.navigate("items").navigate(1usize);

        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn different_routes_to_same_address_share_identity() {
        let (store, root) = store_with_list();

        let navigated = root.navigate("items").navigate(0usize);
        let direct = store
            .cell_at(
                CellAddress::new("home", "list", Path::parse(&["items", "0"])),
                true,
            )
            .unwrap();

        assert_eq!(navigated.key(), direct.key());
    }

    #[test]
    fn reads_are_snapshots() {
        let (_store, root) = store_with_list();

        let mut value = root.read().unwrap();
        // Mutating the returned snapshot must not touch the store.
        path::set_value_at(&mut value, &Path::parse(&["items", "0"]), json!(99));

        assert_eq!(root.read().unwrap(), json!({"items": [1, 2, 3]}));
    }

    #[test]
    fn missing_path_reads_null_missing_entity_errors() {
        let (store, root) = store_with_list();

        assert_eq!(root.navigate("absent").read().unwrap(), Value::Null);

        let gone = CellAddress::new("home", "nope", Path::root());
        assert!(matches!(
            store.read(&gone),
            Err(Error::EntityNotFound { .. })
        ));
    }

    #[test]
    fn commit_applies_atomically_and_bumps_version() {
        let (store, root) = store_with_list();
        assert_eq!(root.version().unwrap(), 0);

        let items = CellAddress::new("home", "list", Path::parse(&["items"]));
        let title = CellAddress::new("home", "list", Path::parse(&["title"]));
        store
            .validate_and_apply(
                0,
                &[],
                &[
                    (items.clone(), json!([1, 2, 3, 4])),
                    (title.clone(), json!("groceries")),
                ],
            )
            .unwrap();

        assert_eq!(
            root.read().unwrap(),
            json!({"items": [1, 2, 3, 4], "title": "groceries"})
        );
        // One version bump per entity per commit.
        assert_eq!(root.version().unwrap(), 1);
    }

    #[test]
    fn failed_write_leaves_store_untouched() {
        let (store, root) = store_with_list();

        let good = CellAddress::new("home", "list", Path::parse(&["title"]));
        let bad = CellAddress::new("home", "list", Path::parse(&["missing", "deep"]));
        let err = store
            .validate_and_apply(
                0,
                &[],
                &[(good, json!("x")), (bad, json!(1))],
            )
            .unwrap_err();

        assert!(matches!(err, Error::PathUnreachable { .. }));
        assert_eq!(root.read().unwrap(), json!({"items": [1, 2, 3]}));
        assert_eq!(root.version().unwrap(), 0);
    }

    #[test]
    fn stale_invariant_is_a_conflict() {
        let (store, _root) = store_with_list();
        let items = CellAddress::new("home", "list", Path::parse(&["items"]));

        // Invariant recorded against the old value.
        let snapshot = store.read(&items).unwrap();
        store
            .validate_and_apply(0, &[], &[(items.clone(), json!([9]))])
            .unwrap();

        let err = store
            .validate_and_apply(1, &[(items.clone(), snapshot)], &[(items, json!([10]))])
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn affected_keys_cover_overlapping_addresses() {
        let (store, root) = store_with_list();

        let items = root.navigate("items");
        let second = items.navigate(1usize);
        let title = root.navigate("title");

        let changed = store.affected_keys(&[second.address().clone()]);
        assert!(changed.contains(&root.key()));
        assert!(changed.contains(&items.key()));
        assert!(changed.contains(&second.key()));
        assert!(!changed.contains(&title.key()));
    }

    #[test]
    fn removed_entity_fails_reads() {
        let (store, root) = store_with_list();
        store
            .remove_entity(&SpaceId::from("home"), &EntityId::from("list"))
            .unwrap();
        assert!(matches!(root.read(), Err(Error::EntityNotFound { .. })));
    }

    #[test]
    fn tagged_snapshot_scans_in_declaration_order() {
        let store = Store::new();
        store.create_space("a");
        store.create_space("b");
        store
            .declare_entity("a", "one", json!({"n": 1}), &["todo"])
            .unwrap();
        store
            .declare_entity("b", "two", json!({"n": 2}), &["todo"])
            .unwrap();
        store
            .declare_entity("b", "three", json!({"n": 3}), &["other"])
            .unwrap();

        let tagged = store.snapshot_tagged("todo");
        assert_eq!(tagged.len(), 2);
        assert_eq!(tagged[0].1.as_str(), "one");
        assert_eq!(tagged[1].1.as_str(), "two");
    }
}
