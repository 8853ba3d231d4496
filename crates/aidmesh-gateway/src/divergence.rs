//! Divergence tracking: fingerprint history of the fleet.
//!
//! After every poll the tracker records which roots the reachable nodes
//! reported. More than one distinct root means the fleet is divergent.
//! Records live in a bounded ring, newest first on read.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

/// Records retained.
pub const RING_CAP: usize = 200;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One observation of the fleet's fingerprints.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DivergenceRecord {
    pub timestamp_ms: u64,
    pub is_divergent: bool,
    /// Per-node Merkle root, hex; unreachable nodes are absent.
    pub merkle_roots: BTreeMap<String, String>,
    pub reachable_node_ids: Vec<String>,
}

#[derive(Default)]
struct TrackerInner {
    ring: VecDeque<DivergenceRecord>,
    /// When the current divergent stretch began.
    divergence_started_ms: Option<u64>,
    total_convergence_events: u64,
    last_convergence_seconds: Option<f64>,
}

/// Process-wide divergence tracker, passed through context.
#[derive(Default)]
pub struct DivergenceTracker {
    inner: Mutex<TrackerInner>,
}

impl DivergenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one poll's roots into the history. Returns the new record.
    pub fn observe(&self, merkle_roots: BTreeMap<String, String>) -> DivergenceRecord {
        let reachable_node_ids: Vec<String> = merkle_roots.keys().cloned().collect();
        let distinct: BTreeSet<&String> = merkle_roots.values().collect();
        let is_divergent = distinct.len() > 1;
        let now = now_ms();

        let record = DivergenceRecord {
            timestamp_ms: now,
            is_divergent,
            merkle_roots,
            reachable_node_ids,
        };

        let mut inner = self.inner.lock();
        if is_divergent {
            inner.divergence_started_ms.get_or_insert(now);
        } else if let Some(started) = inner.divergence_started_ms.take() {
            inner.total_convergence_events += 1;
            inner.last_convergence_seconds = Some((now.saturating_sub(started)) as f64 / 1_000.0);
        }

        if inner.ring.len() == RING_CAP {
            inner.ring.pop_front();
        }
        inner.ring.push_back(record.clone());

        record
    }

    pub fn is_divergent(&self) -> bool {
        self.inner
            .lock()
            .ring
            .back()
            .map(|r| r.is_divergent)
            .unwrap_or(false)
    }

    /// Seconds since the current divergent stretch began; 0 when synced.
    pub fn divergence_duration_seconds(&self) -> f64 {
        let inner = self.inner.lock();
        match inner.divergence_started_ms {
            Some(started) => (now_ms().saturating_sub(started)) as f64 / 1_000.0,
            None => 0.0,
        }
    }

    pub fn total_convergence_events(&self) -> u64 {
        self.inner.lock().total_convergence_events
    }

    pub fn last_convergence_seconds(&self) -> Option<f64> {
        self.inner.lock().last_convergence_seconds
    }

    /// Up to `limit` records, newest first.
    pub fn log(&self, limit: usize) -> Vec<DivergenceRecord> {
        self.inner
            .lock()
            .ring
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_single_root_is_synced() {
        let tracker = DivergenceTracker::new();
        let record = tracker.observe(roots(&[("node-1", "aa"), ("node-2", "aa")]));

        assert!(!record.is_divergent);
        assert!(!tracker.is_divergent());
        assert_eq!(tracker.divergence_duration_seconds(), 0.0);
    }

    #[test]
    fn test_distinct_roots_are_divergent() {
        let tracker = DivergenceTracker::new();
        let record = tracker.observe(roots(&[("node-1", "aa"), ("node-2", "bb")]));

        assert!(record.is_divergent);
        assert!(tracker.is_divergent());
        assert_eq!(record.reachable_node_ids, vec!["node-1", "node-2"]);
    }

    #[test]
    fn test_convergence_closes_the_stretch() {
        let tracker = DivergenceTracker::new();
        tracker.observe(roots(&[("node-1", "aa"), ("node-2", "bb")]));
        assert!(tracker.divergence_duration_seconds() >= 0.0);

        tracker.observe(roots(&[("node-1", "aa"), ("node-2", "aa")]));
        assert!(!tracker.is_divergent());
        assert_eq!(tracker.divergence_duration_seconds(), 0.0);
        assert_eq!(tracker.total_convergence_events(), 1);
        assert!(tracker.last_convergence_seconds().is_some());
    }

    #[test]
    fn test_ring_caps_at_200_newest_first() {
        let tracker = DivergenceTracker::new();
        for i in 0..250 {
            let root = if i % 2 == 0 { "aa" } else { "bb" };
            tracker.observe(roots(&[("node-1", "aa"), ("node-2", root)]));
        }

        let log = tracker.log(usize::MAX);
        assert_eq!(log.len(), RING_CAP);
        // newest first: the final observation (i=249, divergent) leads
        assert!(log[0].is_divergent);
        assert!(log[0].timestamp_ms >= log[RING_CAP - 1].timestamp_ms);
    }

    #[test]
    fn test_empty_fleet_counts_as_synced() {
        let tracker = DivergenceTracker::new();
        let record = tracker.observe(BTreeMap::new());
        assert!(!record.is_divergent);
    }
}
