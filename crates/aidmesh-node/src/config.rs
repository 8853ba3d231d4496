//! Node configuration, read from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Everything an edge node needs to come up.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub node_id: String,
    pub http_port: u16,
    pub gossip_port: u16,
    /// Base gossip tick; each tick is jittered ±10%.
    pub gossip_interval: Duration,
    /// Peer gossip endpoints, `host:port`.
    pub peers: Vec<String>,
    pub data_dir: PathBuf,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl NodeConfig {
    pub fn from_env() -> Self {
        // comma-separated list like "edge-node-2:9000,edge-node-3:9000"
        let peers = std::env::var("PEER_NODES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            node_id: env_or("NODE_ID", "node-1".to_string()),
            http_port: env_or("HTTP_PORT", 8000),
            gossip_port: env_or("GOSSIP_PORT", 9000),
            gossip_interval: Duration::from_secs_f64(env_or("GOSSIP_INTERVAL_SECS", 5.0)),
            peers,
            data_dir: env_or("DATA_DIR", PathBuf::from("/data")),
        }
    }

    /// Where this node's ledger file lives.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            http_port: 8000,
            gossip_port: 9000,
            gossip_interval: Duration::from_secs(5),
            peers: Vec::new(),
            data_dir: PathBuf::from("/data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.node_id, "node-1");
        assert_eq!(config.gossip_interval, Duration::from_secs(5));
        assert!(config.peers.is_empty());
        assert_eq!(config.logs_dir(), PathBuf::from("/data/logs"));
    }
}
