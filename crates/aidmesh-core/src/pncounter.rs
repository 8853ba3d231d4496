//! Positive-Negative Counter CRDT
//!
//! Two G-Counters back to back: one accumulates increments (P), the other
//! decrements (N). Value = P - N. Each half joins independently, so the
//! composite inherits the lattice laws from `GCounter`.

use crate::gcounter::GCounter;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};

/// A Positive-Negative Counter for quantities that move both ways
/// (shelter occupancy, supply levels).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PNCounter {
    p: GCounter,
    n: GCounter,
}

impl PNCounter {
    pub fn new() -> Self {
        Self {
            p: GCounter::new(),
            n: GCounter::new(),
        }
    }

    /// Raise the net value on behalf of `node_id`.
    pub fn increment(&mut self, node_id: &str, amount: u64) {
        self.p.increment(node_id, amount);
    }

    /// Lower the net value on behalf of `node_id`.
    pub fn decrement(&mut self, node_id: &str, amount: u64) {
        self.n.increment(node_id, amount);
    }

    /// Net value: increments minus decrements. May be negative.
    pub fn value(&self) -> i64 {
        (self.p.value() as i64).saturating_sub(self.n.value() as i64)
    }

    /// The increment half.
    pub fn positive(&self) -> &GCounter {
        &self.p
    }

    /// The decrement half.
    pub fn negative(&self) -> &GCounter {
        &self.n
    }
}

impl Lattice for PNCounter {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        Self {
            p: self.p.join(&other.p),
            n: self.n.join(&other.n),
        }
    }
}
