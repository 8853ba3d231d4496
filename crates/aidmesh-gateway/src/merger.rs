//! Consolidation of fetched snapshots into one fleet-wide replica.
//!
//! The consolidated replica is rebuilt from scratch on every poll; nothing
//! is shared across polls, so a node deleted from the roster simply stops
//! contributing.

use aidmesh_replica::{Replica, ReplicaWire};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Result of folding one poll's snapshots.
#[derive(Clone, Debug, Serialize)]
pub struct MergedView {
    pub merged_state: ReplicaWire,
    pub merged_root: String,
    /// Per-node roots, recomputed locally from each snapshot.
    pub per_node_roots: BTreeMap<String, String>,
    pub source_nodes: Vec<String>,
    pub node_count: usize,
    pub merged_at_ms: u64,
}

/// Fold snapshots with plain CRDT merge semantics. Snapshots that fail to
/// parse are skipped and reported back by node id.
pub fn consolidate(snapshots: Vec<ReplicaWire>) -> (Option<MergedView>, Vec<String>) {
    let mut merged = Replica::new("gateway");
    let mut per_node_roots = BTreeMap::new();
    let mut source_nodes = Vec::new();
    let mut rejected = Vec::new();

    for wire in snapshots {
        let node_id = wire.node_id.clone();
        match Replica::from_wire(wire) {
            Ok(replica) => {
                per_node_roots.insert(node_id.clone(), replica.merkle_root().to_hex());
                merged.merge(&replica);
                source_nodes.push(node_id);
            }
            Err(err) => {
                tracing::warn!(node_id, error = %err, "snapshot rejected");
                rejected.push(node_id);
            }
        }
    }

    if source_nodes.is_empty() {
        return (None, rejected);
    }

    let view = MergedView {
        merged_root: merged.merkle_root().to_hex(),
        merged_state: merged.to_wire(),
        per_node_roots,
        node_count: source_nodes.len(),
        source_nodes,
        merged_at_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
    };
    (Some(view), rejected)
}
