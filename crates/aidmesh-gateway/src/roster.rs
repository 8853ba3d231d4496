//! The fleet roster: which edge nodes the gateway knows and how they are
//! doing.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Gateway's view of a node's lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Running,
    Isolated,
    Stopped,
    Unreachable,
}

/// One roster entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: String,
    pub name: String,
    pub url: String,
    pub status: NodeStatus,
    /// Created through the orchestrator (as opposed to statically
    /// configured).
    pub managed: bool,
    pub isolated: bool,
}

impl NodeDescriptor {
    pub fn new(node_id: &str, url: &str, managed: bool) -> Self {
        Self {
            node_id: node_id.to_string(),
            name: format!("edge-{node_id}"),
            url: url.to_string(),
            status: NodeStatus::Running,
            managed,
            isolated: false,
        }
    }
}

/// Poll health per node, maintained by the fleet poller.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NodeHealth {
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<f64>,
    /// Highest replica version seen; older snapshots are skipped as stale.
    pub last_version: Option<u64>,
}

#[derive(Default)]
struct RosterInner {
    nodes: BTreeMap<String, NodeDescriptor>,
    health: BTreeMap<String, NodeHealth>,
}

/// Shared, copy-on-read roster.
#[derive(Default)]
pub struct Roster {
    inner: RwLock<RosterInner>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: NodeDescriptor) {
        let mut inner = self.inner.write();
        inner.health.entry(descriptor.node_id.clone()).or_default();
        inner.nodes.insert(descriptor.node_id.clone(), descriptor);
    }

    pub fn unregister(&self, node_id: &str) -> Option<NodeDescriptor> {
        let mut inner = self.inner.write();
        inner.health.remove(node_id);
        inner.nodes.remove(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<NodeDescriptor> {
        self.inner.read().nodes.get(node_id).cloned()
    }

    pub fn list(&self) -> Vec<NodeDescriptor> {
        self.inner.read().nodes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    pub fn health(&self) -> BTreeMap<String, NodeHealth> {
        self.inner.read().health.clone()
    }

    /// Record a successful fetch; restores Running (or Isolated) status.
    pub fn mark_success(&self, node_id: &str, latency_ms: f64, version: u64) {
        let mut inner = self.inner.write();
        if let Some(health) = inner.health.get_mut(node_id) {
            health.consecutive_failures = 0;
            health.last_error = None;
            health.last_latency_ms = Some(latency_ms);
            health.last_version = Some(health.last_version.map_or(version, |v| v.max(version)));
        }
        if let Some(node) = inner.nodes.get_mut(node_id) {
            node.status = if node.isolated {
                NodeStatus::Isolated
            } else {
                NodeStatus::Running
            };
        }
    }

    /// Record a failed fetch; flips to Unreachable past the threshold.
    pub fn mark_failure(&self, node_id: &str, error: &str, threshold: u32) {
        let mut inner = self.inner.write();
        let failures = {
            let health = match inner.health.get_mut(node_id) {
                Some(health) => health,
                None => return,
            };
            health.consecutive_failures += 1;
            health.last_error = Some(error.to_string());
            health.consecutive_failures
        };
        if failures >= threshold {
            if let Some(node) = inner.nodes.get_mut(node_id) {
                node.status = NodeStatus::Unreachable;
            }
        }
    }

    /// Snapshot version previously seen for a node.
    pub fn last_version(&self, node_id: &str) -> Option<u64> {
        self.inner
            .read()
            .health
            .get(node_id)
            .and_then(|h| h.last_version)
    }

    pub fn set_isolated(&self, node_id: &str, isolated: bool) {
        let mut inner = self.inner.write();
        if let Some(node) = inner.nodes.get_mut(node_id) {
            node.isolated = isolated;
            node.status = if isolated {
                NodeStatus::Isolated
            } else {
                NodeStatus::Running
            };
        }
    }

    pub fn set_all_isolated(&self, isolated: bool) {
        let mut inner = self.inner.write();
        for node in inner.nodes.values_mut() {
            node.isolated = isolated;
            node.status = if isolated {
                NodeStatus::Isolated
            } else {
                NodeStatus::Running
            };
        }
    }
}
