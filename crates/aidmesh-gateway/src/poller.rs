//! Fleet polling: concurrent, deadline-bounded snapshot fetches.

use crate::metrics::MetricsRegistry;
use crate::roster::Roster;
use aidmesh_replica::ReplicaWire;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What one poll round produced.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Fresh, parseable snapshots (stale ones are dropped).
    pub snapshots: Vec<ReplicaWire>,
    pub reachable: Vec<String>,
    pub unreachable: Vec<String>,
    /// Reachable nodes whose snapshot regressed below the last seen
    /// version, skipped this round.
    pub stale: Vec<String>,
}

/// Fetches `/state/snapshot` from every roster node each round.
pub struct FleetPoller {
    client: reqwest::Client,
    roster: Arc<Roster>,
    metrics: Arc<MetricsRegistry>,
    fetch_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    failure_threshold: u32,
}

impl FleetPoller {
    pub fn new(
        roster: Arc<Roster>,
        metrics: Arc<MetricsRegistry>,
        fetch_timeout: Duration,
        max_retries: u32,
        retry_backoff: Duration,
        failure_threshold: u32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            roster,
            metrics,
            fetch_timeout,
            max_retries,
            retry_backoff,
            failure_threshold,
        }
    }

    /// Poll the whole roster concurrently. Never fails; per-node outcomes
    /// land in the roster's health map and the returned outcome.
    pub async fn poll_once(&self) -> PollOutcome {
        let nodes = self.roster.list();
        let fetches = nodes.iter().map(|node| {
            let node_id = node.node_id.clone();
            let url = format!("{}/state/snapshot", node.url);
            async move { (node_id, self.fetch_with_retry(&url).await) }
        });

        let mut outcome = PollOutcome::default();
        for (node_id, result) in futures::future::join_all(fetches).await {
            match result {
                Ok((wire, latency_ms)) => {
                    let last_seen = self.roster.last_version(&node_id);
                    self.roster.mark_success(&node_id, latency_ms, wire.version);
                    outcome.reachable.push(node_id.clone());

                    if last_seen.is_some_and(|last| wire.version < last) {
                        self.metrics.incr("stale_snapshots", 1);
                        tracing::warn!(
                            node_id,
                            version = wire.version,
                            last_seen,
                            "stale snapshot skipped"
                        );
                        outcome.stale.push(node_id);
                    } else {
                        outcome.snapshots.push(wire);
                    }
                }
                Err(error) => {
                    self.roster
                        .mark_failure(&node_id, &error, self.failure_threshold);
                    tracing::warn!(node_id, error, "snapshot fetch failed");
                    outcome.unreachable.push(node_id);
                }
            }
        }

        outcome
    }

    /// One deadline-bounded fetch with bounded retries. Backoff grows
    /// 100ms -> 300ms on the default settings.
    async fn fetch_with_retry(&self, url: &str) -> Result<(ReplicaWire, f64), String> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                self.metrics.incr("http_retries", 1);
                let backoff = self.retry_backoff * 3u32.saturating_pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }

            let started = Instant::now();
            match self.fetch_once(url).await {
                Ok(wire) => {
                    self.metrics.incr("total_http_success", 1);
                    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
                    return Ok((wire, latency_ms));
                }
                Err(error) => {
                    self.metrics.incr("total_http_failures", 1);
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }

    async fn fetch_once(&self, url: &str) -> Result<ReplicaWire, String> {
        let response = self
            .client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        response.json().await.map_err(|e| e.to_string())
    }
}
