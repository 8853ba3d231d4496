//! Scripted chaos scenarios: straight-line state machines with a poll
//! between stages and a structured result at the end.

use crate::context::GatewayContext;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Fleet state sampled after one verification poll.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyState {
    pub is_divergent: bool,
    pub poll_count: u64,
}

/// Structured scenario result. `status` is `ok`, `partial`, or `failed`.
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioResult {
    pub action_id: Uuid,
    pub action: String,
    pub status: String,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converged: Option<bool>,
    pub verification_states: Vec<VerifyState>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

impl ScenarioResult {
    fn begin(action: &str) -> Self {
        Self {
            action_id: Uuid::new_v4(),
            action: action.to_string(),
            status: "failed".to_string(),
            started_at_ms: now_ms(),
            finished_at_ms: 0,
            message: None,
            converged: None,
            verification_states: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    fn finish(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self.finished_at_ms = now_ms();
        self
    }

    fn fail(self, message: String) -> Self {
        let mut result = self.finish("failed");
        result.message = Some(message);
        result
    }
}

async fn verify_convergence(ctx: &GatewayContext, polls: u32) -> Vec<VerifyState> {
    let mut states = Vec::new();
    for _ in 0..polls {
        ctx.poll_cycle().await;
        let is_divergent = ctx.divergence.is_divergent();
        states.push(VerifyState {
            is_divergent,
            poll_count: ctx.poll_count(),
        });
        if !is_divergent {
            break;
        }
    }
    states
}

/// Split the mesh, hold the partition, heal everything, then poll until
/// the fleet fingerprints agree again.
pub async fn run_split_brain_then_heal(
    ctx: Arc<GatewayContext>,
    isolate_seconds: f64,
    verify_polls: u32,
) -> ScenarioResult {
    let mut result = ScenarioResult::begin("split_brain_then_heal");
    let action_id = result.action_id;
    tracing::info!(%action_id, stage = "START", "scenario starting");

    tracing::info!(%action_id, stage = "PARTITIONING", "creating split-brain");
    let split = match ctx.chaos.split_brain().await {
        Ok(outcome) => outcome,
        Err(err) => return result.fail(format!("split-brain setup failed: {err}")),
    };
    result
        .details
        .insert("split_groups".into(), json!(split.nodes));

    tracing::info!(%action_id, stage = "PARTITIONED", isolate_seconds, "holding partition");
    ctx.poll_cycle().await;
    result.details.insert(
        "divergent_after_split".into(),
        json!(ctx.divergence.is_divergent()),
    );
    tokio::time::sleep(Duration::from_secs_f64(isolate_seconds.max(0.0))).await;

    tracing::info!(%action_id, stage = "HEALING", "healing all nodes");
    if let Err(err) = ctx.chaos.heal_all().await {
        return result.fail(format!("heal failed: {err}"));
    }

    tracing::info!(%action_id, stage = "VERIFYING", verify_polls, "waiting for convergence");
    result.verification_states = verify_convergence(&ctx, verify_polls).await;

    let converged = verify_polls > 0 && !ctx.divergence.is_divergent();
    result.converged = Some(converged);
    tracing::info!(%action_id, stage = "DONE", converged, "scenario finished");

    result.finish(if converged { "ok" } else { "partial" })
}

/// The three sample event shapes injected round-robin during bootstrap.
const SAMPLE_EVENTS: [(&str, &str, &str, &str); 3] = [
    ("water_level", "sensor", "bridge_north", "3.2"),
    ("shelter_occupancy", "resource", "shelter_east", "12"),
    ("road_status", "infrastructure", "highway_101", "\"blocked\""),
];

/// Create nodes, inject synthetic events round-robin, poll until every
/// per-node root agrees.
pub async fn run_bootstrap_converge(
    ctx: Arc<GatewayContext>,
    create_nodes: u32,
    events_per_node: u32,
    verify_polls: u32,
) -> ScenarioResult {
    let mut result = ScenarioResult::begin("bootstrap_converge");
    let action_id = result.action_id;
    tracing::info!(%action_id, stage = "START", create_nodes, events_per_node, "scenario starting");

    let batch = ctx.chaos.create_nodes_batch(create_nodes).await;
    result
        .details
        .insert("created_count".into(), json!(batch.created_count));
    if !batch.failures.is_empty() {
        result
            .details
            .insert("create_failures".into(), json!(batch.failures));
    }

    let targets = ctx.roster.list();
    if targets.is_empty() {
        return result.fail("no nodes available for event submission".to_string());
    }

    let client = reqwest::Client::new();
    for node in &targets {
        wait_for_ready(&client, &node.url).await;
    }

    let mut successful_events = 0u32;
    let mut failed_events = 0u32;
    for (idx, node) in targets.iter().enumerate() {
        for event_idx in 0..events_per_node.max(1) {
            let (event_type, category, location, raw_value) =
                SAMPLE_EVENTS[(idx + event_idx as usize) % SAMPLE_EVENTS.len()];
            let value: Value = serde_json::from_str(raw_value).unwrap_or(Value::Null);
            let payload = json!({
                "type": event_type,
                "value": value,
                "location": location,
                "category": category,
                "metadata": {
                    "source": "scenario_bootstrap",
                    "scenario_action_id": action_id.to_string(),
                },
            });

            let sent = client
                .post(format!("{}/event", node.url))
                .timeout(Duration::from_secs(5))
                .json(&payload)
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => successful_events += 1,
                Ok(resp) => {
                    tracing::warn!(%action_id, node = node.node_id, status = %resp.status(), "event rejected");
                    failed_events += 1;
                }
                Err(err) => {
                    tracing::warn!(%action_id, node = node.node_id, error = %err, "event send failed");
                    failed_events += 1;
                }
            }
        }
    }
    result
        .details
        .insert("successful_events".into(), json!(successful_events));
    result
        .details
        .insert("failed_events".into(), json!(failed_events));

    tracing::info!(%action_id, stage = "VERIFYING", verify_polls, "waiting for convergence");
    result.verification_states = verify_convergence(&ctx, verify_polls.max(1)).await;

    let converged = !ctx.divergence.is_divergent();
    result.converged = Some(converged);
    tracing::info!(%action_id, stage = "DONE", converged, successful_events, "scenario finished");

    result.finish(if converged && failed_events == 0 {
        "ok"
    } else {
        "partial"
    })
}

/// Poll a node's merkle endpoint until it answers, bounded.
async fn wait_for_ready(client: &reqwest::Client, url: &str) -> bool {
    for _ in 0..10 {
        let probe = client
            .get(format!("{url}/state/merkle"))
            .timeout(Duration::from_secs(3))
            .send()
            .await;
        if matches!(probe, Ok(ref resp) if resp.status().is_success()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    false
}

/// Run a scenario under the gateway-wide deadline. On expiry the partial
/// marker is returned and the operation mutex (held by the caller) is
/// released as the future unwinds.
pub async fn with_deadline(
    deadline: Duration,
    action: &str,
    scenario: impl std::future::Future<Output = ScenarioResult>,
) -> ScenarioResult {
    match tokio::time::timeout(deadline, scenario).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(action, "scenario deadline exceeded");
            let mut result = ScenarioResult::begin(action).finish("partial");
            result.message = Some(format!(
                "deadline of {}s exceeded",
                deadline.as_secs()
            ));
            result.converged = Some(false);
            result
        }
    }
}
