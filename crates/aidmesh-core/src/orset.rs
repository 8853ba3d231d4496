//! Observed-Remove Set (OR-Set / Add-Wins Set)
//!
//! Every add carries a unique tag; a remove tombstones only the tags it has
//! observed. A concurrent add under a fresh tag therefore survives a remove
//! issued elsewhere - add wins. Both halves of the state only grow, so the
//! join is a plain union on each and membership is computed at read time.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Unique tag for one add operation: the element's id plus the node that
/// performed the add. Rendered `<id>@<node>` on the wire.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag {
    pub id: String,
    pub node: String,
}

impl Tag {
    pub fn new(id: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node: node.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.node)
    }
}

impl FromStr for Tag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((id, node)) if !id.is_empty() && !node.is_empty() => Ok(Self::new(id, node)),
            _ => Err(format!("malformed tag: {s}")),
        }
    }
}

impl TryFrom<String> for Tag {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}

/// An Observed-Remove Set keyed by tag.
///
/// `adds` maps every tag ever observed to its element; `removes` is the
/// tombstone set. An element is present iff at least one of its add tags
/// has not been tombstoned. Add entries are kept even once tombstoned so
/// that the join stays a union and a removed tag can never resurrect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ORSet<T: Clone> {
    adds: BTreeMap<Tag, T>,
    removes: BTreeSet<Tag>,
}

impl<T: Clone> ORSet<T> {
    pub fn new() -> Self {
        Self {
            adds: BTreeMap::new(),
            removes: BTreeSet::new(),
        }
    }

    /// Reassemble a set from transported halves. Tombstones are kept even
    /// when their add is absent, so a later union cannot resurrect them.
    pub fn from_parts(adds: BTreeMap<Tag, T>, removes: BTreeSet<Tag>) -> Self {
        Self { adds, removes }
    }

    /// Record an add under `tag`. Re-adding an existing tag is a no-op.
    pub fn add(&mut self, tag: Tag, element: T) {
        self.adds.entry(tag).or_insert(element);
    }

    /// Tombstone a single observed tag.
    pub fn remove_tag(&mut self, tag: &Tag) {
        if self.adds.contains_key(tag) {
            self.removes.insert(tag.clone());
        }
    }

    /// Tombstone every observed tag whose element matches the predicate.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) {
        for (tag, element) in &self.adds {
            if pred(element) {
                self.removes.insert(tag.clone());
            }
        }
    }

    /// Whether `tag` currently contributes a live element.
    pub fn contains_tag(&self, tag: &Tag) -> bool {
        self.adds.contains_key(tag) && !self.removes.contains(tag)
    }

    /// Live `(tag, element)` pairs in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (&Tag, &T)> {
        self.adds
            .iter()
            .filter(|(tag, _)| !self.removes.contains(*tag))
    }

    /// Every observed add, tombstoned or not.
    pub fn adds(&self) -> &BTreeMap<Tag, T> {
        &self.adds
    }

    /// The tombstone set.
    pub fn removes(&self) -> &BTreeSet<Tag> {
        &self.removes
    }

    /// Number of live tags.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<T: Clone> Default for ORSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq> Lattice for ORSet<T> {
    fn bottom() -> Self {
        Self::new()
    }

    /// Union of adds with union of tombstones. A tag collision carries the
    /// same element on both sides (tags embed the element's id), so either
    /// copy works.
    fn join(&self, other: &Self) -> Self {
        let mut adds = self.adds.clone();
        for (tag, element) in &other.adds {
            adds.entry(tag.clone()).or_insert_with(|| element.clone());
        }

        Self {
            adds,
            removes: self.removes.union(&other.removes).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: &str, node: &str) -> Tag {
        Tag::new(id, node)
    }

    #[test]
    fn test_orset_add_and_contains() {
        let mut set = ORSet::new();
        set.add(tag("e1", "node-1"), "flood");

        assert!(set.contains_tag(&tag("e1", "node-1")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_orset_remove_tombstones_observed_tag() {
        let mut set = ORSet::new();
        set.add(tag("e1", "node-1"), "flood");
        set.remove_tag(&tag("e1", "node-1"));

        assert!(!set.contains_tag(&tag("e1", "node-1")));
        assert!(set.is_empty());
        // the add entry survives as history
        assert_eq!(set.adds().len(), 1);
    }

    #[test]
    fn test_orset_removed_tag_never_resurrects() {
        let mut a = ORSet::new();
        a.add(tag("e1", "node-1"), "flood");
        a.remove_tag(&tag("e1", "node-1"));

        // a replica that still has the add but not the remove
        let mut b = ORSet::new();
        b.add(tag("e1", "node-1"), "flood");

        let joined = a.join(&b);
        assert!(!joined.contains_tag(&tag("e1", "node-1")));
    }

    #[test]
    fn test_orset_concurrent_add_wins_over_remove() {
        // node-1 adds then removes its own tag; node-2 concurrently adds
        // the same logical element under its own tag
        let mut a = ORSet::new();
        a.add(tag("e1", "node-1"), "flood");
        a.remove_tag(&tag("e1", "node-1"));

        let mut b = ORSet::new();
        b.add(tag("e2", "node-2"), "flood");

        let joined = a.join(&b);
        assert_eq!(joined.len(), 1);
        assert!(joined.contains_tag(&tag("e2", "node-2")));
    }

    #[test]
    fn test_orset_join_commutative_and_idempotent() {
        let mut a = ORSet::new();
        a.add(tag("e1", "node-1"), "flood");

        let mut b = ORSet::new();
        b.add(tag("e2", "node-2"), "outage");
        b.remove_tag(&tag("e2", "node-2"));

        assert_eq!(a.join(&b), b.join(&a));
        assert_eq!(a.join(&a), a);
    }

    #[test]
    fn test_orset_remove_where() {
        let mut set = ORSet::new();
        set.add(tag("e1", "node-1"), "flood");
        set.add(tag("e2", "node-1"), "outage");
        set.remove_where(|e| *e == "flood");

        assert_eq!(set.len(), 1);
        assert!(set.contains_tag(&tag("e2", "node-1")));
    }

    #[test]
    fn test_tag_wire_round_trip() {
        let t = tag("550e8400-e29b-41d4-a716-446655440000", "node-7");
        let rendered = t.to_string();
        assert_eq!(rendered.parse::<Tag>().unwrap(), t);

        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, format!("\"{rendered}\""));
        let back: Tag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_tag_parse_rejects_garbage() {
        assert!("no-separator".parse::<Tag>().is_err());
        assert!("@node".parse::<Tag>().is_err());
        assert!("id@".parse::<Tag>().is_err());
    }
}
