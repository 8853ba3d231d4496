//! The orchestrator port: how the gateway touches the container runtime.
//!
//! Chaos operations never talk to Docker directly; they go through this
//! trait so tests can swap in the in-process fake.

use crate::error::GatewayError;
use crate::roster::NodeDescriptor;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tokio::process::Command;

/// Create/delete containers and inject packet-filter rules into them.
#[async_trait]
pub trait OrchestratorPort: Send + Sync {
    /// Spawn a node container; returns its roster entry.
    async fn create(&self, node_id: &str) -> Result<NodeDescriptor, GatewayError>;

    /// Stop and remove a node container.
    async fn delete(&self, node_id: &str) -> Result<(), GatewayError>;

    /// Drop all UDP in both directions inside the node.
    async fn exec_isolate(&self, node_id: &str) -> Result<(), GatewayError>;

    /// Flush INPUT/OUTPUT rules, restoring connectivity.
    async fn exec_heal(&self, node_id: &str) -> Result<(), GatewayError>;

    /// Drop traffic to and from specific peer addresses (split-brain).
    async fn exec_block(&self, node_id: &str, peer_hosts: &[String]) -> Result<(), GatewayError>;
}

/// Docker-CLI implementation. Containers are named `edge-<node_id>`, share
/// one bridge network, and run with NET_ADMIN so iptables works inside.
pub struct DockerOrchestrator {
    pub image: String,
    pub network: String,
    pub gossip_port: u16,
    pub http_port: u16,
}

impl Default for DockerOrchestrator {
    fn default() -> Self {
        Self {
            image: "aidmesh-node".to_string(),
            network: "aidmesh-mesh".to_string(),
            gossip_port: 9000,
            http_port: 8000,
        }
    }
}

impl DockerOrchestrator {
    fn container_name(node_id: &str) -> String {
        format!("edge-{node_id}")
    }

    async fn docker(&self, args: &[&str]) -> Result<String, GatewayError> {
        let output = Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| GatewayError::OrchestratorFailure(format!("docker not runnable: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::OrchestratorFailure(format!(
                "docker {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Gossip endpoints of every running edge container, for PEER_NODES.
    async fn running_peer_endpoints(&self) -> Result<Vec<String>, GatewayError> {
        let names = self
            .docker(&["ps", "--format", "{{.Names}}"])
            .await?
            .lines()
            .filter(|n| n.starts_with("edge-"))
            .map(str::to_string)
            .collect::<Vec<_>>();
        Ok(names
            .into_iter()
            .map(|name| format!("{name}:{}", self.gossip_port))
            .collect())
    }
}

#[async_trait]
impl OrchestratorPort for DockerOrchestrator {
    async fn create(&self, node_id: &str) -> Result<NodeDescriptor, GatewayError> {
        let name = Self::container_name(node_id);
        let peers = self.running_peer_endpoints().await?.join(",");

        self.docker(&[
            "run",
            "-d",
            "--name",
            &name,
            "--network",
            &self.network,
            "--cap-add",
            "NET_ADMIN",
            "-e",
            &format!("NODE_ID={node_id}"),
            "-e",
            &format!("HTTP_PORT={}", self.http_port),
            "-e",
            &format!("GOSSIP_PORT={}", self.gossip_port),
            "-e",
            &format!("PEER_NODES={peers}"),
            &self.image,
        ])
        .await?;

        let url = format!("http://{name}:{}", self.http_port);
        tracing::info!(node_id, container = name, url, "node container created");
        Ok(NodeDescriptor::new(node_id, &url, true))
    }

    async fn delete(&self, node_id: &str) -> Result<(), GatewayError> {
        let name = Self::container_name(node_id);
        self.docker(&["rm", "-f", &name]).await?;
        tracing::info!(node_id, container = name, "node container removed");
        Ok(())
    }

    async fn exec_isolate(&self, node_id: &str) -> Result<(), GatewayError> {
        let name = Self::container_name(node_id);
        self.docker(&["exec", &name, "iptables", "-A", "INPUT", "-p", "udp", "-j", "DROP"])
            .await?;
        self.docker(&["exec", &name, "iptables", "-A", "OUTPUT", "-p", "udp", "-j", "DROP"])
            .await?;
        Ok(())
    }

    async fn exec_heal(&self, node_id: &str) -> Result<(), GatewayError> {
        let name = Self::container_name(node_id);
        self.docker(&["exec", &name, "iptables", "-F", "INPUT"]).await?;
        self.docker(&["exec", &name, "iptables", "-F", "OUTPUT"]).await?;
        Ok(())
    }

    async fn exec_block(&self, node_id: &str, peer_hosts: &[String]) -> Result<(), GatewayError> {
        let name = Self::container_name(node_id);
        for host in peer_hosts {
            self.docker(&["exec", &name, "iptables", "-A", "INPUT", "-s", host, "-j", "DROP"])
                .await?;
            self.docker(&["exec", &name, "iptables", "-A", "OUTPUT", "-d", host, "-j", "DROP"])
                .await?;
        }
        Ok(())
    }
}

/// In-process fake for tests: tracks what was asked of it, can be told to
/// fail, and hands out descriptors with configurable urls.
#[derive(Default)]
pub struct FakeOrchestrator {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    nodes: BTreeMap<String, NodeDescriptor>,
    isolated: BTreeSet<String>,
    blocked: BTreeMap<String, Vec<String>>,
    urls: BTreeMap<String, String>,
    fail_next_create: bool,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-assign the url the next `create(node_id)` should hand out
    /// (lets tests point descriptors at real local listeners).
    pub fn stage_url(&self, node_id: &str, url: &str) {
        self.state
            .lock()
            .urls
            .insert(node_id.to_string(), url.to_string());
    }

    pub fn fail_next_create(&self) {
        self.state.lock().fail_next_create = true;
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().nodes.keys().cloned().collect()
    }

    pub fn isolated(&self) -> BTreeSet<String> {
        self.state.lock().isolated.clone()
    }

    pub fn blocked(&self, node_id: &str) -> Vec<String> {
        self.state
            .lock()
            .blocked
            .get(node_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl OrchestratorPort for FakeOrchestrator {
    async fn create(&self, node_id: &str) -> Result<NodeDescriptor, GatewayError> {
        let mut state = self.state.lock();
        if state.fail_next_create {
            state.fail_next_create = false;
            return Err(GatewayError::OrchestratorFailure(
                "injected create failure".into(),
            ));
        }
        let url = state
            .urls
            .get(node_id)
            .cloned()
            .unwrap_or_else(|| format!("http://edge-{node_id}:8000"));
        let descriptor = NodeDescriptor::new(node_id, &url, true);
        state.nodes.insert(node_id.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    async fn delete(&self, node_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.nodes.remove(node_id);
        state.isolated.remove(node_id);
        state.blocked.remove(node_id);
        Ok(())
    }

    async fn exec_isolate(&self, node_id: &str) -> Result<(), GatewayError> {
        self.state.lock().isolated.insert(node_id.to_string());
        Ok(())
    }

    async fn exec_heal(&self, node_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.isolated.remove(node_id);
        state.blocked.remove(node_id);
        Ok(())
    }

    async fn exec_block(&self, node_id: &str, peer_hosts: &[String]) -> Result<(), GatewayError> {
        self.state
            .lock()
            .blocked
            .entry(node_id.to_string())
            .or_default()
            .extend(peer_hosts.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_tracks_lifecycle() {
        let fake = FakeOrchestrator::new();
        let descriptor = fake.create("node-7").await.unwrap();
        assert_eq!(descriptor.name, "edge-node-7");
        assert!(descriptor.managed);
        assert_eq!(fake.created(), vec!["node-7"]);

        fake.exec_isolate("node-7").await.unwrap();
        assert!(fake.isolated().contains("node-7"));

        fake.exec_heal("node-7").await.unwrap();
        assert!(fake.isolated().is_empty());

        fake.delete("node-7").await.unwrap();
        assert!(fake.created().is_empty());
    }

    #[tokio::test]
    async fn test_fake_injects_create_failure() {
        let fake = FakeOrchestrator::new();
        fake.fail_next_create();

        let err = fake.create("node-1").await.unwrap_err();
        assert!(matches!(err, GatewayError::OrchestratorFailure(_)));

        // only the next create fails
        assert!(fake.create("node-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_fake_records_block_rules() {
        let fake = FakeOrchestrator::new();
        fake.create("node-1").await.unwrap();
        fake.exec_block("node-1", &["edge-node-2".into(), "edge-node-3".into()])
            .await
            .unwrap();

        assert_eq!(fake.blocked("node-1"), vec!["edge-node-2", "edge-node-3"]);
    }
}
