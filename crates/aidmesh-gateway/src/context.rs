//! Process-wide gateway state, wired once at startup and passed to every
//! handler and background task.

use crate::chaos::ChaosController;
use crate::config::GatewayConfig;
use crate::divergence::DivergenceTracker;
use crate::merger::{self, MergedView};
use crate::metrics::MetricsRegistry;
use crate::orchestrator::OrchestratorPort;
use crate::poller::FleetPoller;
use crate::roster::{NodeDescriptor, NodeHealth, Roster};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Everything the gateway's handlers and loops share.
pub struct GatewayContext {
    pub config: GatewayConfig,
    pub roster: Arc<Roster>,
    pub metrics: Arc<MetricsRegistry>,
    pub divergence: Arc<DivergenceTracker>,
    pub poller: FleetPoller,
    pub chaos: ChaosController,
    pub orchestrator: Arc<dyn OrchestratorPort>,
    /// Coarse lock serializing scenarios and chaos operations.
    pub operation_mutex: tokio::sync::Mutex<()>,
    merged: RwLock<Option<MergedView>>,
    poll_count: AtomicU64,
    last_poll_ms: AtomicU64,
}

impl GatewayContext {
    pub fn new(config: GatewayConfig, orchestrator: Arc<dyn OrchestratorPort>) -> Arc<Self> {
        let roster = Arc::new(Roster::new());
        for (node_id, url) in &config.edge_nodes {
            roster.register(NodeDescriptor::new(node_id, url, false));
        }

        let metrics = Arc::new(MetricsRegistry::new());
        let poller = FleetPoller::new(
            roster.clone(),
            metrics.clone(),
            config.fetch_timeout,
            config.max_retries,
            config.retry_backoff,
            config.failure_threshold,
        );
        let chaos = ChaosController::new(roster.clone(), orchestrator.clone());

        Arc::new(Self {
            config,
            roster,
            metrics,
            divergence: Arc::new(DivergenceTracker::new()),
            poller,
            chaos,
            orchestrator,
            operation_mutex: tokio::sync::Mutex::new(()),
            merged: RwLock::new(None),
            poll_count: AtomicU64::new(0),
            last_poll_ms: AtomicU64::new(0),
        })
    }

    /// One full poll round: fetch, consolidate, record divergence, publish
    /// metrics, swap in the fresh merged view.
    pub async fn poll_cycle(&self) {
        self.metrics.incr("polls_started", 1);
        let outcome = self.poller.poll_once().await;

        let merge_started = Instant::now();
        let (view, rejected) = merger::consolidate(outcome.snapshots);
        let merge_ms = merge_started.elapsed().as_secs_f64() * 1_000.0;

        if !rejected.is_empty() {
            self.metrics.incr("state_merges_failed", rejected.len() as u64);
        }
        if let Some(view) = &view {
            self.metrics.incr("merges_applied", view.node_count as u64);
        }

        let roots = view
            .as_ref()
            .map(|v| v.per_node_roots.clone())
            .unwrap_or_default();
        let record = self.divergence.observe(roots);
        if record.is_divergent {
            tracing::warn!(roots = ?record.merkle_roots, "divergence detected");
        }

        self.metrics.set("last_reachable_nodes", outcome.reachable.len() as u64);
        self.metrics.set("last_merge_duration_ms", merge_ms as u64);
        self.metrics.set(
            "total_convergence_events",
            self.divergence.total_convergence_events(),
        );
        self.metrics.record("merge_time_ms", merge_ms);
        self.metrics
            .record("reachable_nodes", outcome.reachable.len() as f64);
        self.metrics.incr("polls_completed", 1);

        if let Some(view) = view {
            tracing::info!(
                nodes = view.node_count,
                divergent = record.is_divergent,
                merge_ms = format!("{merge_ms:.1}"),
                root = &view.merged_root[..12],
                "poll complete"
            );
            *self.merged.write() = Some(view);
        }

        self.poll_count.fetch_add(1, Ordering::Relaxed);
        self.last_poll_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn merged_view(&self) -> Option<MergedView> {
        self.merged.read().clone()
    }

    pub fn poll_count(&self) -> u64 {
        self.poll_count.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> GatewayStatus {
        let registered_nodes = self
            .roster
            .list()
            .into_iter()
            .map(|n| (n.node_id.clone(), n.url))
            .collect();

        GatewayStatus {
            node_id: "gateway".to_string(),
            registered_nodes,
            node_health: self.roster.health(),
            is_divergent: self.divergence.is_divergent(),
            divergence_duration_seconds: self.divergence.divergence_duration_seconds(),
            poll_count: self.poll_count(),
            last_poll_ms: match self.last_poll_ms.load(Ordering::Relaxed) {
                0 => None,
                ms => Some(ms),
            },
            merged_root: self.merged.read().as_ref().map(|v| v.merged_root.clone()),
            runtime_metrics: self.metrics.counters(),
        }
    }
}

/// Body of `GET /gateway/status`.
#[derive(Debug, Serialize)]
pub struct GatewayStatus {
    pub node_id: String,
    pub registered_nodes: BTreeMap<String, String>,
    pub node_health: BTreeMap<String, NodeHealth>,
    pub is_divergent: bool,
    pub divergence_duration_seconds: f64,
    pub poll_count: u64,
    pub last_poll_ms: Option<u64>,
    pub merged_root: Option<String>,
    pub runtime_metrics: BTreeMap<String, u64>,
}
