//! Serializable references between cells.
//!
//! A link names a cell in some space: `{owner space, entity id, path}`
//! plus a mode. `Redirect` links are live aliases: resolved for write,
//! they hand back a handle whose writes land in the referenced cell.
//! `Copy` links are read-only projections of the target; asking them for
//! write capability is an error, never a silent no-op.
//!
//! # Wire format
//!
//! Links serialize as `{"link": {"id": ..., "path": [...], "space": ...}}`.
//! The mode is only written when it is `copy`; a plain wire link is a
//! redirect, so a persisted redirect round-trips back into a live
//! writable alias rather than degrading to a static value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::{CellAddress, CellRef, EntityId, Path, SpaceId, Store};

/// Whether a link is a live alias or a read-only projection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// Read-only projection of the target value.
    Copy,
    /// Live alias: writes through the link land in the target cell.
    #[default]
    Redirect,
}

impl LinkMode {
    fn is_redirect(&self) -> bool {
        matches!(self, LinkMode::Redirect)
    }
}

/// A serializable reference to a cell, possibly in another space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub space: SpaceId,
    pub id: EntityId,
    pub path: Path,
    pub mode: LinkMode,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    link: Body,
}

#[derive(Serialize, Deserialize)]
struct Body {
    id: EntityId,
    path: Path,
    space: SpaceId,
    #[serde(default, skip_serializing_if = "LinkMode::is_redirect")]
    mode: LinkMode,
}

impl Link {
    pub fn redirect(
        space: impl Into<SpaceId>,
        id: impl Into<EntityId>,
        path: Path,
    ) -> Self {
        Self {
            space: space.into(),
            id: id.into(),
            path,
            mode: LinkMode::Redirect,
        }
    }

    pub fn copy(space: impl Into<SpaceId>, id: impl Into<EntityId>, path: Path) -> Self {
        Self {
            space: space.into(),
            id: id.into(),
            path,
            mode: LinkMode::Copy,
        }
    }

    /// The address this link points at.
    pub fn address(&self) -> CellAddress {
        CellAddress::new(self.space.clone(), self.id.clone(), self.path.clone())
    }

    /// Link-aware equality: do two references name the same cell?
    ///
    /// Two links may reach one logical cell through different modes, so
    /// plain structural equality over-distinguishes. This compares the
    /// normalized target only.
    pub fn same_target(&self, other: &Link) -> bool {
        self.space == other.space && self.id == other.id && self.path == other.path
    }

    /// Resolve for reading. Either mode resolves; the handle is
    /// read-only. A missing target is a loud error.
    pub fn resolve(&self, store: &Store) -> Result<CellRef> {
        self.resolve_inner(store, false)
    }

    /// Resolve for writing. Only `Redirect` links carry write
    /// capability; a `Copy` link fails here by design.
    pub fn resolve_for_write(&self, store: &Store) -> Result<CellRef> {
        if self.mode == LinkMode::Copy {
            return Err(Error::ReadOnlyRef {
                address: self.address(),
            });
        }
        self.resolve_inner(store, true)
    }

    fn resolve_inner(&self, store: &Store, writable: bool) -> Result<CellRef> {
        store
            .cell_at(self.address(), writable)
            .map_err(|err| match err {
                Error::SpaceNotFound(space) => Error::LinkTargetMissing {
                    space,
                    entity: self.id.clone(),
                },
                Error::EntityNotFound { space, entity } => {
                    Error::LinkTargetMissing { space, entity }
                }
                other => other,
            })
    }

    /// Embed this link inside a stored document value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("link serialization is infallible")
    }

    /// Extract a link embedded in a document value.
    pub fn from_value(value: &Value) -> Result<Link> {
        serde_json::from_value(value.clone()).map_err(Error::MalformedLink)
    }

    /// Cheap structural test for embedded links.
    pub fn is_link_value(value: &Value) -> bool {
        value
            .as_object()
            .map(|map| map.contains_key("link"))
            .unwrap_or(false)
    }
}

impl Serialize for Link {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        Wire {
            link: Body {
                id: self.id.clone(),
                path: self.path.clone(),
                space: self.space.clone(),
                mode: self.mode,
            },
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let wire = Wire::deserialize(deserializer)?;
        Ok(Link {
            space: wire.link.space,
            id: wire.link.id,
            path: wire.link.path,
            mode: wire.link.mode,
        })
    }
}

impl CellRef {
    /// A live writable alias for this cell. Requires write capability on
    /// the handle itself; a read-only ref cannot mint a redirect link.
    pub fn redirect_link(&self) -> Result<Link> {
        if !self.is_writable() {
            return Err(Error::ReadOnlyRef {
                address: self.address().clone(),
            });
        }
        Ok(Link::redirect(
            self.space().clone(),
            self.entity().clone(),
            self.path().clone(),
        ))
    }

    /// A read-only projection link for this cell.
    pub fn copy_link(&self) -> Link {
        Link::copy(
            self.space().clone(),
            self.entity().clone(),
            self.path().clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_target() -> Store {
        let store = Store::new();
        store.create_space("workshop");
        store
            .declare_entity("workshop", "counter", json!({"count": 7}), &[])
            .unwrap();
        store
    }

    #[test]
    fn redirect_serializes_without_mode() {
        let link = Link::redirect("workshop", "counter", Path::parse(&["count"]));
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(
            json,
            json!({"link": {"id": "counter", "path": ["count"], "space": "workshop"}})
        );
    }

    #[test]
    fn copy_mode_survives_the_wire() {
        let link = Link::copy("workshop", "counter", Path::root());
        let text = serde_json::to_string(&link).unwrap();
        let back: Link = serde_json::from_str(&text).unwrap();
        assert_eq!(back.mode, LinkMode::Copy);
    }

    #[test]
    fn plain_wire_link_deserializes_as_redirect() {
        let text = r#"{"link": {"id": "counter", "path": ["count"], "space": "workshop"}}"#;
        let link: Link = serde_json::from_str(text).unwrap();
        assert_eq!(link.mode, LinkMode::Redirect);
        assert_eq!(link.path, Path::parse(&["count"]));
    }

    #[test]
    fn same_target_ignores_mode() {
        let a = Link::redirect("workshop", "counter", Path::parse(&["count"]));
        let b = Link::copy("workshop", "counter", Path::parse(&["count"]));
        let c = Link::redirect("workshop", "counter", Path::root());

        assert!(a.same_target(&b));
        assert_ne!(a, b);
        assert!(!a.same_target(&c));
    }

    #[test]
    fn copy_link_refuses_write_resolution() {
        let store = store_with_target();
        let link = Link::copy("workshop", "counter", Path::root());

        assert!(link.resolve(&store).is_ok());
        assert!(matches!(
            link.resolve_for_write(&store),
            Err(Error::ReadOnlyRef { .. })
        ));
    }

    #[test]
    fn dangling_link_is_a_loud_failure() {
        let store = store_with_target();
        let link = Link::redirect("workshop", "vanished", Path::root());
        assert!(matches!(
            link.resolve(&store),
            Err(Error::LinkTargetMissing { .. })
        ));
    }

    #[test]
    fn resolved_redirect_is_writable_resolved_copy_is_not() {
        let store = store_with_target();

        let redirect = Link::redirect("workshop", "counter", Path::parse(&["count"]));
        assert!(redirect.resolve_for_write(&store).unwrap().is_writable());
        assert!(!redirect.resolve(&store).unwrap().is_writable());
    }

    #[test]
    fn embedded_link_round_trips_through_a_document() {
        let link = Link::redirect("workshop", "counter", Path::parse(&["count"]));
        let value = link.to_value();
        assert!(Link::is_link_value(&value));

        let back = Link::from_value(&value).unwrap();
        assert!(back.same_target(&link));
        assert_eq!(back.mode, LinkMode::Redirect);
    }

    #[test]
    fn read_only_ref_cannot_mint_redirect_link() {
        let store = store_with_target();
        let cell = store.cell("workshop", "counter").unwrap();

        assert!(cell.redirect_link().is_ok());
        assert!(matches!(
            cell.read_only().redirect_link(),
            Err(Error::ReadOnlyRef { .. })
        ));
    }
}
