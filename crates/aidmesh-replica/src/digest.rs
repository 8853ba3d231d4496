//! Merkle fingerprint of a replica's semantic state.
//!
//! Leaves are hashed per item (events sorted by id, then counter, register,
//! and pn-counter entries sorted by key) and reduced pairwise until one
//! root remains, duplicating the odd leaf of a level. The ledger is
//! excluded on purpose: two replicas that reached the same state through
//! different ingestion orders must fingerprint-match.

use crate::hash::{Hash, Hasher};

/// Hash one leaf: a section prefix, the item key, and the item's canonical
/// serialization.
pub fn leaf(section: &str, key: &str, canonical: &str) -> Hash {
    Hasher::hash_all(&[
        section.as_bytes(),
        b":",
        key.as_bytes(),
        b":",
        canonical.as_bytes(),
    ])
}

/// Reduce a leaf list to a single root. An empty state digests the
/// literal `empty`.
pub fn reduce(mut level: Vec<Hash>) -> Hash {
    if level.is_empty() {
        return Hasher::hash(b"empty");
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = pair.get(1).copied().unwrap_or(left);
            next.push(Hasher::hash_all(&[left.as_bytes(), right.as_bytes()]));
        }
        level = next;
    }

    level[0]
}
