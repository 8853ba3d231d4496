//! Chaos operations: partitions, heals, and node lifecycle, all routed
//! through the orchestrator port.

use crate::error::GatewayError;
use crate::orchestrator::OrchestratorPort;
use crate::roster::{NodeDescriptor, Roster};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Structured response for one chaos operation.
#[derive(Clone, Debug, Serialize)]
pub struct ChaosOutcome {
    pub action_id: Uuid,
    pub action: String,
    pub target: String,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,
}

impl ChaosOutcome {
    fn ok(action: &str, target: &str, message: String) -> Self {
        Self {
            action_id: Uuid::new_v4(),
            action: action.to_string(),
            target: target.to_string(),
            status: "ok".to_string(),
            message,
            nodes: Vec::new(),
        }
    }

    fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }
}

/// Batch node creation result.
#[derive(Clone, Debug, Serialize)]
pub struct BatchOutcome {
    pub requested: u32,
    pub created_count: u32,
    pub created: Vec<NodeDescriptor>,
    pub failures: Vec<String>,
}

/// Strip the host out of `http://host:port`.
fn host_of(url: &str) -> String {
    url.trim_start_matches("http://")
        .trim_start_matches("https://")
        .split([':', '/'])
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Imperative chaos surface over the roster and the orchestrator.
pub struct ChaosController {
    roster: Arc<Roster>,
    orchestrator: Arc<dyn OrchestratorPort>,
}

impl ChaosController {
    pub fn new(roster: Arc<Roster>, orchestrator: Arc<dyn OrchestratorPort>) -> Self {
        Self {
            roster,
            orchestrator,
        }
    }

    /// Cut a node off from gossip (UDP DROP both directions).
    pub async fn isolate(&self, node_id: &str) -> Result<ChaosOutcome, GatewayError> {
        let node = self
            .roster
            .get(node_id)
            .ok_or_else(|| GatewayError::UnknownNode(node_id.to_string()))?;
        self.orchestrator.exec_isolate(node_id).await?;
        self.roster.set_isolated(node_id, true);
        tracing::info!(node_id, "node isolated");
        Ok(ChaosOutcome::ok(
            "isolate_node",
            &node.name,
            format!("isolated {}", node.name),
        ))
    }

    /// Restore a node's connectivity.
    pub async fn heal(&self, node_id: &str) -> Result<ChaosOutcome, GatewayError> {
        let node = self
            .roster
            .get(node_id)
            .ok_or_else(|| GatewayError::UnknownNode(node_id.to_string()))?;
        self.orchestrator.exec_heal(node_id).await?;
        self.roster.set_isolated(node_id, false);
        tracing::info!(node_id, "node healed");
        Ok(ChaosOutcome::ok(
            "heal_node",
            &node.name,
            format!("healed {}", node.name),
        ))
    }

    /// Heal every node in parallel.
    pub async fn heal_all(&self) -> Result<ChaosOutcome, GatewayError> {
        let nodes = self.roster.list();
        let heals = nodes
            .iter()
            .map(|node| self.orchestrator.exec_heal(&node.node_id));
        let results = futures::future::join_all(heals).await;

        let mut healed = Vec::new();
        for (node, result) in nodes.iter().zip(results) {
            result?;
            healed.push(node.name.clone());
        }
        self.roster.set_all_isolated(false);

        tracing::info!(nodes = ?healed, "all nodes healed");
        Ok(ChaosOutcome::ok("heal_all", "mesh", "healed all edge nodes".to_string())
            .with_nodes(healed))
    }

    /// Partition the roster into two halves that cannot hear each other.
    /// Intra-half gossip keeps flowing.
    pub async fn split_brain(&self) -> Result<ChaosOutcome, GatewayError> {
        let nodes = self.roster.list();
        if nodes.len() < 2 {
            return Err(GatewayError::InvalidInput(
                "split-brain needs at least 2 nodes".to_string(),
            ));
        }

        let mid = nodes.len().div_ceil(2);
        let (group_a, group_b) = nodes.split_at(mid);
        let hosts_a: Vec<String> = group_a.iter().map(|n| host_of(&n.url)).collect();
        let hosts_b: Vec<String> = group_b.iter().map(|n| host_of(&n.url)).collect();

        for node in group_a {
            self.orchestrator.exec_block(&node.node_id, &hosts_b).await?;
        }
        for node in group_b {
            self.orchestrator.exec_block(&node.node_id, &hosts_a).await?;
        }
        self.roster.set_all_isolated(true);

        let names_a: Vec<String> = group_a.iter().map(|n| n.name.clone()).collect();
        let names_b: Vec<String> = group_b.iter().map(|n| n.name.clone()).collect();
        tracing::info!(group_a = ?names_a, group_b = ?names_b, "split-brain created");

        let mut all = names_a;
        all.extend(names_b);
        Ok(
            ChaosOutcome::ok("split_brain", "mesh", "created split-brain partition".to_string())
                .with_nodes(all),
        )
    }

    /// Spawn a node, picking the lowest free `node-N` id when none given.
    pub async fn create_node(
        &self,
        node_id: Option<String>,
    ) -> Result<NodeDescriptor, GatewayError> {
        let node_id = match node_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => self.next_node_id(),
        };
        if self.roster.get(&node_id).is_some() {
            return Err(GatewayError::InvalidInput(format!(
                "node {node_id} already exists"
            )));
        }

        let descriptor = self.orchestrator.create(&node_id).await?;
        self.roster.register(descriptor.clone());
        tracing::info!(node_id, url = descriptor.url, "node created");
        Ok(descriptor)
    }

    /// Stop a node's container and drop it from the roster.
    pub async fn delete_node(&self, node_id: &str) -> Result<ChaosOutcome, GatewayError> {
        let node = self
            .roster
            .get(node_id)
            .ok_or_else(|| GatewayError::UnknownNode(node_id.to_string()))?;
        self.orchestrator.delete(node_id).await?;
        self.roster.unregister(node_id);
        tracing::info!(node_id, "node removed");
        Ok(ChaosOutcome::ok(
            "remove_node",
            &node.name,
            format!("removed {}", node.name),
        ))
    }

    /// Best-effort batch creation.
    pub async fn create_nodes_batch(&self, count: u32) -> BatchOutcome {
        let mut created = Vec::new();
        let mut failures = Vec::new();
        for _ in 0..count {
            match self.create_node(None).await {
                Ok(descriptor) => created.push(descriptor),
                Err(err) => failures.push(err.to_string()),
            }
        }
        BatchOutcome {
            requested: count,
            created_count: created.len() as u32,
            created,
            failures,
        }
    }

    fn next_node_id(&self) -> String {
        let used: std::collections::BTreeSet<u32> = self
            .roster
            .list()
            .iter()
            .filter_map(|n| n.node_id.strip_prefix("node-")?.parse().ok())
            .collect();
        let mut candidate = 1;
        while used.contains(&candidate) {
            candidate += 1;
        }
        format!("node-{candidate}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::FakeOrchestrator;
    use crate::roster::NodeStatus;

    fn controller() -> (ChaosController, Arc<Roster>, Arc<FakeOrchestrator>) {
        let roster = Arc::new(Roster::new());
        let fake = Arc::new(FakeOrchestrator::new());
        let controller = ChaosController::new(roster.clone(), fake.clone());
        (controller, roster, fake)
    }

    #[tokio::test]
    async fn test_isolate_and_heal_round_trip() {
        let (chaos, roster, fake) = controller();
        roster.register(NodeDescriptor::new("node-1", "http://edge-node-1:8000", false));

        let outcome = chaos.isolate("node-1").await.unwrap();
        assert_eq!(outcome.status, "ok");
        assert!(fake.isolated().contains("node-1"));
        assert_eq!(roster.get("node-1").unwrap().status, NodeStatus::Isolated);

        chaos.heal("node-1").await.unwrap();
        assert!(fake.isolated().is_empty());
        assert!(!roster.get("node-1").unwrap().isolated);
    }

    #[tokio::test]
    async fn test_isolate_unknown_node_fails() {
        let (chaos, _roster, _fake) = controller();
        let err = chaos.isolate("node-9").await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_split_brain_blocks_across_halves_only() {
        let (chaos, roster, fake) = controller();
        for i in 1..=5 {
            roster.register(NodeDescriptor::new(
                &format!("node-{i}"),
                &format!("http://edge-node-{i}:8000"),
                false,
            ));
        }

        chaos.split_brain().await.unwrap();

        // first ceil(5/2) = 3 nodes block the other 2, and vice versa
        assert_eq!(fake.blocked("node-1"), vec!["edge-node-4", "edge-node-5"]);
        assert_eq!(
            fake.blocked("node-4"),
            vec!["edge-node-1", "edge-node-2", "edge-node-3"]
        );
        assert!(roster.list().iter().all(|n| n.isolated));
    }

    #[tokio::test]
    async fn test_split_brain_needs_two_nodes() {
        let (chaos, roster, _fake) = controller();
        roster.register(NodeDescriptor::new("node-1", "http://edge-node-1:8000", false));

        let err = chaos.split_brain().await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_heal_all_clears_every_partition() {
        let (chaos, roster, fake) = controller();
        for i in 1..=3 {
            roster.register(NodeDescriptor::new(
                &format!("node-{i}"),
                &format!("http://edge-node-{i}:8000"),
                false,
            ));
        }
        chaos.split_brain().await.unwrap();

        let outcome = chaos.heal_all().await.unwrap();
        assert_eq!(outcome.nodes.len(), 3);
        assert!(fake.blocked("node-1").is_empty());
        assert!(roster.list().iter().all(|n| !n.isolated));
    }

    #[tokio::test]
    async fn test_create_node_picks_next_free_id() {
        let (chaos, roster, _fake) = controller();
        roster.register(NodeDescriptor::new("node-1", "http://edge-node-1:8000", false));
        roster.register(NodeDescriptor::new("node-3", "http://edge-node-3:8000", false));

        let descriptor = chaos.create_node(None).await.unwrap();
        assert_eq!(descriptor.node_id, "node-2");
        assert!(descriptor.managed);
        assert_eq!(roster.len(), 3);
    }

    #[tokio::test]
    async fn test_create_node_rejects_duplicates() {
        let (chaos, _roster, _fake) = controller();
        chaos.create_node(Some("node-1".into())).await.unwrap();

        let err = chaos.create_node(Some("node-1".into())).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delete_node_drops_roster_entry() {
        let (chaos, roster, _fake) = controller();
        chaos.create_node(Some("node-1".into())).await.unwrap();

        chaos.delete_node("node-1").await.unwrap();
        assert!(roster.is_empty());

        let err = chaos.delete_node("node-1").await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_batch_create_reports_partial_failures() {
        let (chaos, _roster, fake) = controller();
        fake.fail_next_create();

        let batch = chaos.create_nodes_batch(3).await;
        assert_eq!(batch.requested, 3);
        assert_eq!(batch.created_count, 2);
        assert_eq!(batch.failures.len(), 1);
    }
}
