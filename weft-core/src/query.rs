//! Cross-entity lookup by tag ("wish" queries).
//!
//! A wish scans every space for entities carrying a tag and returns
//! minimal, read-optimized projections. Projections are deliberately
//! narrow: they expose only the entity's top-level scalar fields and
//! carry a copy-mode link, so nothing obtained through a query is
//! write-capable. Writing requires explicitly requesting a redirect
//! link from the owning side instead.

use serde_json::{Map, Value};

use crate::link::Link;
use crate::store::{EntityId, Path, SpaceId, Store};

/// A read-optimized view of one matching entity.
///
/// The projection may omit fields present on the full entity: nested
/// records and sequences are not carried, only top-level scalars.
#[derive(Debug, Clone)]
pub struct Projection {
    space: SpaceId,
    entity: EntityId,
    link: Link,
    fields: Map<String, Value>,
}

impl Projection {
    pub fn space(&self) -> &SpaceId {
        &self.space
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    /// The copy-mode link naming the matched entity. Resolving it for
    /// write fails; that is the point.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// A projected scalar field, if the entity had one at top level.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

fn minimal_fields(value: &Value) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Value::Object(map) = value {
        for (name, field) in map {
            if matches!(
                field,
                Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
            ) {
                fields.insert(name.clone(), field.clone());
            }
        }
    }
    fields
}

impl Store {
    /// Find every entity carrying `tag`, across all spaces, in
    /// declaration order.
    pub fn wish(&self, tag: &str) -> Vec<Projection> {
        self.snapshot_tagged(tag)
            .into_iter()
            .map(|(space, entity, value)| Projection {
                link: Link::copy(space.clone(), entity.clone(), Path::root()),
                fields: minimal_fields(&value),
                space,
                entity,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::link::LinkMode;
    use serde_json::json;

    fn seeded_store() -> Store {
        let store = Store::new();
        store.create_space("desk");
        store
            .declare_entity(
                "desk",
                "note-1",
                json!({"title": "groceries", "done": false, "items": [1, 2]}),
                &["note"],
            )
            .unwrap();
        store
            .declare_entity("desk", "note-2", json!({"title": "taxes"}), &["note", "urgent"])
            .unwrap();
        store
            .declare_entity("desk", "photo", json!({"title": "cat"}), &["image"])
            .unwrap();
        store
    }

    #[test]
    fn wish_matches_by_tag() {
        let store = seeded_store();
        let notes = store.wish("note");
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].entity().as_str(), "note-1");
        assert_eq!(notes[1].entity().as_str(), "note-2");

        let urgent = store.wish("urgent");
        assert_eq!(urgent.len(), 1);
        assert!(store.wish("missing").is_empty());
    }

    #[test]
    fn projections_carry_scalars_and_omit_structures() {
        let store = seeded_store();
        let note = &store.wish("note")[0];

        assert_eq!(note.field("title"), Some(&json!("groceries")));
        assert_eq!(note.field("done"), Some(&json!(false)));
        // The sequence field is omitted from the minimal projection.
        assert_eq!(note.field("items"), None);
    }

    #[test]
    fn projection_links_are_not_write_capable() {
        let store = seeded_store();
        let note = &store.wish("note")[0];

        assert_eq!(note.link().mode, LinkMode::Copy);
        assert!(note.link().resolve(&store).is_ok());
        assert!(matches!(
            note.link().resolve_for_write(&store),
            Err(Error::ReadOnlyRef { .. })
        ));
    }
}
