//! Grow-only Counter CRDT
//!
//! Each node owns one entry in the map and may only ever raise it. The
//! total is the sum of all entries, and the join takes the elementwise max,
//! so a duplicated or re-delivered state never double-counts.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A Grow-only Counter (G-Counter) CRDT.
///
/// Tracks one non-negative count per node id. Value = sum of all entries.
/// Decrements are not representable; pair two of these (see `PNCounter`)
/// when a quantity must go down.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GCounter {
    counts: BTreeMap<String, u64>,
}

impl GCounter {
    /// Create a counter with no entries.
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// Raise the entry owned by `node_id` by `amount`.
    pub fn increment(&mut self, node_id: &str, amount: u64) {
        let entry = self.counts.entry(node_id.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Current total across all nodes.
    pub fn value(&self) -> u64 {
        self.counts.values().sum()
    }

    /// The entry owned by a single node.
    pub fn get(&self, node_id: &str) -> u64 {
        self.counts.get(node_id).copied().unwrap_or(0)
    }

    /// All per-node entries, sorted by node id.
    pub fn entries(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl Lattice for GCounter {
    fn bottom() -> Self {
        Self::new()
    }

    /// Elementwise max per node entry.
    fn join(&self, other: &Self) -> Self {
        let mut counts = self.counts.clone();
        for (node, v) in &other.counts {
            counts
                .entry(node.clone())
                .and_modify(|e| *e = (*e).max(*v))
                .or_insert(*v);
        }
        Self { counts }
    }
}
