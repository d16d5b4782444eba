//! Paths into structured cell values.
//!
//! A path is a sequence of segments navigating from an entity's root value
//! into a nested record field or sequence element. Paths are part of a
//! cell's identity, so they must be cheap to clone, hashable, and
//! serializable. On the wire a path is an array of strings; index segments
//! are rendered as decimal strings so the format stays JSON-safe.

use std::fmt;
use std::str::FromStr;

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use smallvec::SmallVec;

/// One navigation step: a record field or a sequence index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// Named field of a record value.
    Field(String),
    /// Position in a sequence value.
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

impl FromStr for PathSegment {
    type Err = std::convert::Infallible;

    /// Every string parses: all-digit strings become indices, anything
    /// else a field name. This mirrors how segments are rendered.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(i) = s.parse::<usize>() {
                return Ok(PathSegment::Index(i));
            }
        }
        Ok(PathSegment::Field(s.to_string()))
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        s.parse().expect("segment parse is infallible")
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        PathSegment::Index(i)
    }
}

/// A sequence of segments from an entity root to a sub-cell.
///
/// Most paths are shallow; segments are stored inline up to four deep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(SmallVec<[PathSegment; 4]>);

impl Path {
    /// The empty path, addressing the entity root itself.
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    /// Build a path from anything segment-like.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PathSegment>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse from a slice of rendered segments.
    pub fn parse(segments: &[&str]) -> Self {
        Self::from_segments(segments.iter().copied())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// A new path with one more segment appended.
    pub fn join(&self, segment: impl Into<PathSegment>) -> Self {
        let mut out = self.clone();
        out.0.push(segment.into());
        out
    }

    /// True if `self` is `prefix` or starts with `prefix`.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// True if one path is an ancestor of (or equal to) the other.
    ///
    /// A write at one address affects reads at every overlapping address,
    /// in both directions.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for segment in &self.0 {
            seq.serialize_element(&segment.to_string())?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PathVisitor;

        impl<'de> Visitor<'de> for PathVisitor {
            type Value = Path;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sequence of path segment strings")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<Path, A::Error> {
                let mut segments = SmallVec::new();
                while let Some(s) = seq.next_element::<String>()? {
                    segments.push(PathSegment::from(s.as_str()));
                }
                Ok(Path(segments))
            }
        }

        deserializer.deserialize_seq(PathVisitor)
    }
}

/// Navigate a value along a path. `None` if any step is missing or the
/// shapes do not line up.
pub(crate) fn value_at<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match (segment, current) {
            (PathSegment::Field(name), Value::Object(map)) => map.get(name)?,
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Replace the value at a path, building nothing along the way.
///
/// Record fields may be inserted fresh; sequence writes must land at an
/// existing index or exactly one past the end. Returns `false` when the
/// parent of the target is missing or has the wrong shape.
pub(crate) fn set_value_at(root: &mut Value, path: &Path, new: Value) -> bool {
    let Some((last, parents)) = path.segments().split_last() else {
        *root = new;
        return true;
    };

    let mut current = root;
    for segment in parents {
        current = match (segment, current) {
            (PathSegment::Field(name), Value::Object(map)) => match map.get_mut(name) {
                Some(v) => v,
                None => return false,
            },
            (PathSegment::Index(i), Value::Array(items)) => match items.get_mut(*i) {
                Some(v) => v,
                None => return false,
            },
            _ => return false,
        };
    }

    match (last, current) {
        (PathSegment::Field(name), Value::Object(map)) => {
            map.insert(name.clone(), new);
            true
        }
        (PathSegment::Index(i), Value::Array(items)) => {
            if *i < items.len() {
                items[*i] = new;
                true
            } else if *i == items.len() {
                items.push(new);
                true
            } else {
                false
            }
        }
        _ => false,
    }
}
