//! Gateway configuration, read from environment variables.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub http_port: u16,
    /// Fleet poll cadence.
    pub poll_interval: Duration,
    /// Hard deadline for one snapshot fetch.
    pub fetch_timeout: Duration,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles-ish to 300ms on the second.
    pub retry_backoff: Duration,
    /// Consecutive failed polls before a node is marked unreachable.
    pub failure_threshold: u32,
    /// Total budget for one scenario run.
    pub scenario_deadline: Duration,
    /// Statically configured fleet, `(node_id, url)` pairs.
    pub edge_nodes: Vec<(String, String)>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        // "edge-node-1:8000,edge-node-2:8000"; hostname doubles as node id
        let edge_nodes = std::env::var("EDGE_NODES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .filter_map(|entry| {
                let (host, port) = entry.rsplit_once(':')?;
                Some((host.to_string(), format!("http://{host}:{port}")))
            })
            .collect();

        Self {
            http_port: env_or("HTTP_PORT", 8000),
            poll_interval: Duration::from_secs_f64(env_or("GATEWAY_POLL_INTERVAL_SECS", 2.0)),
            fetch_timeout: Duration::from_millis(env_or("GATEWAY_FETCH_TIMEOUT_MS", 1_500)),
            max_retries: env_or("GATEWAY_HTTP_RETRIES", 2),
            retry_backoff: Duration::from_millis(env_or("GATEWAY_HTTP_RETRY_BACKOFF_MS", 100)),
            failure_threshold: 3,
            scenario_deadline: Duration::from_secs(env_or("GATEWAY_SCENARIO_DEADLINE_SECS", 60)),
            edge_nodes,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_port: 8000,
            poll_interval: Duration::from_secs(2),
            fetch_timeout: Duration::from_millis(1_500),
            max_retries: 2,
            retry_backoff: Duration::from_millis(100),
            failure_threshold: 3,
            scenario_deadline: Duration::from_secs(60),
            edge_nodes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.failure_threshold, 3);
    }
}
