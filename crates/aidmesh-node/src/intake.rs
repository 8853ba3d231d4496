//! HTTP intake and query API for an edge node.

use crate::config::NodeConfig;
use crate::gossip::GossipStats;
use aidmesh_replica::{EventDraft, ReplicaError, ReplicaStore, ReplicaWire};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Shared state behind every intake handler.
pub struct NodeContext {
    pub config: NodeConfig,
    pub store: Arc<ReplicaStore>,
    pub gossip_stats: Arc<GossipStats>,
    pub started_at: Instant,
}

type AppState = Arc<NodeContext>;

/// Build the intake router.
pub fn build_router(context: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/event", post(receive_event))
        .route("/status", get(status))
        .route("/state/merkle", get(state_merkle))
        .route("/state/snapshot", get(state_snapshot))
        .route("/log", get(log_records))
        .route("/merge", post(merge_state))
        .layer(cors)
        .with_state(context)
}

/// Error body every handler returns on failure.
#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

struct IntakeError(StatusCode, String);

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        (self.0, Json(ApiError { error: self.1 })).into_response()
    }
}

impl From<ReplicaError> for IntakeError {
    fn from(err: ReplicaError) -> Self {
        let status = match err {
            ReplicaError::InvalidInput(_) | ReplicaError::InvalidReplica(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        IntakeError(status, err.to_string())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    event_id: String,
    merkle_root: String,
    log_seq: u64,
    version: u64,
}

async fn receive_event(
    State(context): State<AppState>,
    Json(draft): Json<EventDraft>,
) -> Result<Json<IngestResponse>, IntakeError> {
    let receipt = context.store.ingest_event(draft)?;
    tracing::info!(
        event_id = %receipt.event.event_id,
        event_type = receipt.event.event_type,
        log_seq = receipt.log_seq,
        "event ingested"
    );
    Ok(Json(IngestResponse {
        event_id: receipt.event.event_id.to_string(),
        merkle_root: receipt.merkle_root.to_hex(),
        log_seq: receipt.log_seq,
        version: receipt.version,
    }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    node_id: String,
    peers: Vec<String>,
    event_count: usize,
    merkle_root_prefix: String,
    isolated: bool,
    version: u64,
    uptime_seconds: f64,
}

async fn status(State(context): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        node_id: context.config.node_id.clone(),
        peers: context.config.peers.clone(),
        event_count: context.store.event_count(),
        merkle_root_prefix: context.store.merkle_root().short(),
        isolated: looks_isolated(&context),
        version: context.store.version(),
        uptime_seconds: context.started_at.elapsed().as_secs_f64(),
    })
}

/// A node with peers that has heard nothing for three gossip intervals is
/// probably cut off.
fn looks_isolated(context: &NodeContext) -> bool {
    if context.config.peers.is_empty() {
        return false;
    }
    let silence_budget = context.config.gossip_interval * 3;
    if context.started_at.elapsed() < silence_budget {
        return false;
    }

    let last_ms = context.gossip_stats.last_received_ms.load(Ordering::Relaxed);
    if last_ms == 0 {
        return true;
    }
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    now_ms.saturating_sub(last_ms) > silence_budget.as_millis() as u64
}

#[derive(Debug, Serialize)]
struct MerkleResponse {
    node_id: String,
    merkle_root: String,
    version: u64,
}

async fn state_merkle(State(context): State<AppState>) -> Json<MerkleResponse> {
    Json(MerkleResponse {
        node_id: context.config.node_id.clone(),
        merkle_root: context.store.merkle_root().to_hex(),
        version: context.store.version(),
    })
}

async fn state_snapshot(State(context): State<AppState>) -> Json<ReplicaWire> {
    Json(context.store.snapshot())
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    #[serde(default)]
    since: u64,
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    100
}

async fn log_records(
    State(context): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Json<serde_json::Value> {
    let records = context.store.log_since(query.since, query.limit);
    let audit = context.store.verify_log();
    Json(serde_json::json!({
        "records": records,
        "total": context.store.log_len(),
        "valid": audit.valid,
        "latest_hash": context.store.latest_log_hash().to_hex(),
    }))
}

#[derive(Debug, Serialize)]
struct MergeResponse {
    merged: aidmesh_replica::MergeReport,
    merkle_root: String,
}

async fn merge_state(
    State(context): State<AppState>,
    Json(wire): Json<ReplicaWire>,
) -> Result<Json<MergeResponse>, IntakeError> {
    let from_node = wire.node_id.clone();
    let (report, root) = context.store.merge_wire(wire)?;
    tracing::info!(
        from_node,
        new_events = report.new_events,
        root = %root.short(),
        "state merged over http"
    );
    Ok(Json(MergeResponse {
        merged: report,
        merkle_root: root.to_hex(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn spawn_node(node_id: &str) -> (String, Arc<NodeContext>) {
        let context = Arc::new(NodeContext {
            config: NodeConfig {
                node_id: node_id.to_string(),
                ..NodeConfig::default()
            },
            store: Arc::new(ReplicaStore::in_memory(node_id)),
            gossip_stats: Arc::new(GossipStats::default()),
            started_at: Instant::now(),
        });

        let router = build_router(context.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (format!("http://{addr}"), context)
    }

    #[tokio::test]
    async fn test_post_event_returns_id_and_root() {
        let (base, context) = spawn_node("node-1").await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/event"))
            .json(&json!({
                "type": "water_level",
                "value": 3.2,
                "location": "bridge_north",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["merkle_root"].as_str().unwrap().len(), 64);
        assert_eq!(body["version"], 1);
        assert_eq!(context.store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_post_event_rejects_invalid_input() {
        let (base, _context) = spawn_node("node-1").await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/event"))
            .json(&json!({
                "type": "",
                "value": 1,
                "location": "bridge_north",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("type"));
    }

    #[tokio::test]
    async fn test_status_and_merkle_endpoints_agree() {
        let (base, _context) = spawn_node("node-1").await;
        let client = reqwest::Client::new();

        client
            .post(format!("{base}/event"))
            .json(&json!({"type": "water_level", "value": 1, "location": "a"}))
            .send()
            .await
            .unwrap();

        let status: serde_json::Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let merkle: serde_json::Value = client
            .get(format!("{base}/state/merkle"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(status["node_id"], "node-1");
        assert_eq!(status["event_count"], 1);
        assert_eq!(status["isolated"], false);
        let prefix = status["merkle_root_prefix"].as_str().unwrap();
        assert!(merkle["merkle_root"].as_str().unwrap().starts_with(prefix));
    }

    #[tokio::test]
    async fn test_snapshot_merges_into_another_node() {
        let (base1, _context1) = spawn_node("node-1").await;
        let (base2, context2) = spawn_node("node-2").await;
        let client = reqwest::Client::new();

        client
            .post(format!("{base1}/event"))
            .json(&json!({"type": "road_status", "value": "blocked", "location": "highway_101"}))
            .send()
            .await
            .unwrap();

        let snapshot: serde_json::Value = client
            .get(format!("{base1}/state/snapshot"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let resp = client
            .post(format!("{base2}/merge"))
            .json(&snapshot)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["merged"]["new_events"], 1);
        assert_eq!(context2.store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_log_endpoint_reports_valid_chain() {
        let (base, _context) = spawn_node("node-1").await;
        let client = reqwest::Client::new();

        for i in 0..3 {
            client
                .post(format!("{base}/event"))
                .json(&json!({"type": "water_level", "value": i, "location": "a"}))
                .send()
                .await
                .unwrap();
        }

        let body: serde_json::Value = client
            .get(format!("{base}/log?since=1&limit=2"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["valid"], true);
        assert_eq!(body["total"], 4);
        assert_eq!(body["records"].as_array().unwrap().len(), 2);
        assert_eq!(body["records"][0]["seq"], 1);
    }

    #[test]
    fn test_draft_with_metadata_deserializes() {
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), json!("field_team"));
        let draft = EventDraft {
            event_type: "water_level".into(),
            value: json!(3.2),
            location: "bridge_north".into(),
            metadata,
            category: Default::default(),
            operation: Default::default(),
        };
        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["type"], "water_level");
    }
}
