//! Last-Write-Wins Register CRDT
//!
//! Holds a payload stamped with `(ts_ms, node_id)`. The join keeps whichever
//! side carries the greater stamp under lexicographic order, so two replicas
//! that have seen the same writes always agree on the surviving payload.
//! A wall-clock tie is broken by the greater node id.

use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A Last-Write-Wins Register.
///
/// Publishes "the current reading" for one key. Older stamps never
/// overwrite newer ones, regardless of arrival order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LWWRegister<T: Ord + Clone> {
    /// The current payload, if anything was ever written.
    value: Option<T>,
    /// Wall-clock milliseconds of the winning write.
    ts_ms: u64,
    /// The node that made the winning write (tie-breaker).
    node_id: String,
}

impl<T: Ord + Clone> LWWRegister<T> {
    /// Create an empty register.
    pub fn new() -> Self {
        Self {
            value: None,
            ts_ms: 0,
            node_id: String::new(),
        }
    }

    /// Write a payload with the given stamp. A write only lands if its
    /// stamp is not older than the current one.
    pub fn set(&mut self, value: T, ts_ms: u64, node_id: &str) {
        if ts_ms > self.ts_ms || (ts_ms == self.ts_ms && node_id >= self.node_id.as_str()) {
            self.value = Some(value);
            self.ts_ms = ts_ms;
            self.node_id = node_id.to_string();
        }
    }

    /// The current payload, if any.
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Stamp of the winning write.
    pub fn ts_ms(&self) -> u64 {
        self.ts_ms
    }

    /// Node that made the winning write.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

impl<T: Ord + Clone> Default for LWWRegister<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Clone> Lattice for LWWRegister<T> {
    fn bottom() -> Self {
        Self::new()
    }

    /// Keep the side with the greater `(ts_ms, node_id)` stamp. A full
    /// stamp tie falls back to comparing payloads so the join stays
    /// deterministic either way round.
    fn join(&self, other: &Self) -> Self {
        let self_wins = match self.ts_ms.cmp(&other.ts_ms) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match self.node_id.cmp(&other.node_id) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => self.value >= other.value,
            },
        };

        if self_wins {
            self.clone()
        } else {
            other.clone()
        }
    }
}
