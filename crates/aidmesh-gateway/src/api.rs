//! HTTP API for the gateway.

use crate::context::GatewayContext;
use crate::error::GatewayError;
use crate::scenarios;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

type AppState = Arc<GatewayContext>;

/// Build the gateway router.
pub fn build_router(context: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/nodes", get(list_nodes))
        .route("/nodes", post(create_node))
        .route("/nodes/batch", post(create_nodes_batch))
        .route("/nodes/:id", delete(delete_node))
        .route("/nodes/:id/partition", post(partition_node))
        .route("/nodes/:id/partition", delete(heal_node))
        .route("/partition/split-brain", post(split_brain))
        .route("/partition/heal-all", post(heal_all))
        .route("/gateway/status", get(gateway_status))
        .route("/gateway/poll", post(trigger_poll))
        .route("/gateway/merged-state", get(merged_state))
        .route("/gateway/divergence", get(divergence_log))
        .route("/gateway/metrics", get(metrics))
        .route("/gateway/runtime-metrics", get(runtime_metrics))
        .route("/scenarios/split-brain-heal", post(scenario_split_brain_heal))
        .route("/scenarios/bootstrap-converge", post(scenario_bootstrap_converge))
        .layer(cors)
        .with_state(context)
}

struct ApiError(GatewayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            GatewayError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                json!({"status": "failed", "message": msg}),
            ),
            GatewayError::UnknownNode(id) => (
                StatusCode::NOT_FOUND,
                json!({"status": "failed", "message": format!("unknown node: {id}")}),
            ),
            GatewayError::Busy => (
                StatusCode::CONFLICT,
                json!({"status": "busy", "message": "another operation is in progress"}),
            ),
            GatewayError::OrchestratorFailure(msg) => (
                StatusCode::BAD_GATEWAY,
                json!({"status": "failed", "message": msg}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

/// Grab the operation mutex or answer 409.
macro_rules! exclusive {
    ($ctx:expr) => {
        match $ctx.operation_mutex.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Err(ApiError(GatewayError::Busy)),
        }
    };
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn list_nodes(State(ctx): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "nodes": ctx.roster.list(),
        "health": ctx.roster.health(),
    }))
}

#[derive(Debug, Deserialize)]
struct CreateNodeQuery {
    node_id: Option<String>,
}

async fn create_node(
    State(ctx): State<AppState>,
    Query(query): Query<CreateNodeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let _guard = exclusive!(ctx);
    let descriptor = ctx.chaos.create_node(query.node_id).await?;
    Ok(Json(json!({"status": "ok", "node": descriptor})))
}

#[derive(Debug, Deserialize)]
struct BatchQuery {
    count: u32,
}

async fn create_nodes_batch(
    State(ctx): State<AppState>,
    Query(query): Query<BatchQuery>,
) -> Result<Json<crate::chaos::BatchOutcome>, ApiError> {
    let _guard = exclusive!(ctx);
    Ok(Json(ctx.chaos.create_nodes_batch(query.count).await))
}

async fn delete_node(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::chaos::ChaosOutcome>, ApiError> {
    let _guard = exclusive!(ctx);
    Ok(Json(ctx.chaos.delete_node(&id).await?))
}

async fn partition_node(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::chaos::ChaosOutcome>, ApiError> {
    let _guard = exclusive!(ctx);
    Ok(Json(ctx.chaos.isolate(&id).await?))
}

async fn heal_node(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::chaos::ChaosOutcome>, ApiError> {
    let _guard = exclusive!(ctx);
    Ok(Json(ctx.chaos.heal(&id).await?))
}

async fn split_brain(
    State(ctx): State<AppState>,
) -> Result<Json<crate::chaos::ChaosOutcome>, ApiError> {
    let _guard = exclusive!(ctx);
    Ok(Json(ctx.chaos.split_brain().await?))
}

async fn heal_all(
    State(ctx): State<AppState>,
) -> Result<Json<crate::chaos::ChaosOutcome>, ApiError> {
    let _guard = exclusive!(ctx);
    Ok(Json(ctx.chaos.heal_all().await?))
}

async fn gateway_status(State(ctx): State<AppState>) -> Json<crate::context::GatewayStatus> {
    Json(ctx.status())
}

async fn trigger_poll(State(ctx): State<AppState>) -> Json<crate::context::GatewayStatus> {
    ctx.poll_cycle().await;
    Json(ctx.status())
}

async fn merged_state(State(ctx): State<AppState>) -> Response {
    match ctx.merged_view() {
        Some(view) => Json(view).into_response(),
        None => Json(json!({"status": "no data yet, trigger a poll first"})).into_response(),
    }
}

async fn divergence_log(State(ctx): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "is_divergent": ctx.divergence.is_divergent(),
        "divergence_duration_seconds": ctx.divergence.divergence_duration_seconds(),
        "total_convergence_events": ctx.divergence.total_convergence_events(),
        "log": ctx.divergence.log(crate::divergence::RING_CAP),
    }))
}

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    name: Option<String>,
    #[serde(default = "default_metrics_limit")]
    limit: usize,
}

fn default_metrics_limit() -> usize {
    100
}

async fn metrics(
    State(ctx): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Json<serde_json::Value> {
    match query.name {
        Some(name) => Json(json!({
            "name": name,
            "samples": ctx.metrics.series(&name, query.limit),
        })),
        None => Json(json!({
            "counters": ctx.metrics.counters(),
            "series": ctx.metrics.series_names(),
        })),
    }
}

async fn runtime_metrics(State(ctx): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime_metrics": ctx.metrics.counters(),
        "node_health": ctx.roster.health(),
        "registered_node_count": ctx.roster.len(),
        "is_divergent": ctx.divergence.is_divergent(),
        "divergence_duration_seconds": ctx.divergence.divergence_duration_seconds(),
        "poll_count": ctx.poll_count(),
    }))
}

#[derive(Debug, Deserialize)]
struct SplitBrainHealQuery {
    #[serde(default = "default_isolate_seconds")]
    isolate_seconds: f64,
    #[serde(default = "default_verify_polls")]
    verify_polls: u32,
}

fn default_isolate_seconds() -> f64 {
    8.0
}

fn default_verify_polls() -> u32 {
    2
}

async fn scenario_split_brain_heal(
    State(ctx): State<AppState>,
    Query(query): Query<SplitBrainHealQuery>,
) -> Result<Json<scenarios::ScenarioResult>, ApiError> {
    let _guard = exclusive!(ctx);
    let result = scenarios::with_deadline(
        ctx.config.scenario_deadline,
        "split_brain_then_heal",
        scenarios::run_split_brain_then_heal(ctx.clone(), query.isolate_seconds, query.verify_polls),
    )
    .await;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct BootstrapQuery {
    #[serde(default)]
    create_nodes: u32,
    #[serde(default = "default_events_per_node")]
    events_per_node: u32,
    #[serde(default = "default_bootstrap_polls")]
    verify_polls: u32,
}

fn default_events_per_node() -> u32 {
    1
}

fn default_bootstrap_polls() -> u32 {
    3
}

async fn scenario_bootstrap_converge(
    State(ctx): State<AppState>,
    Query(query): Query<BootstrapQuery>,
) -> Result<Json<scenarios::ScenarioResult>, ApiError> {
    let _guard = exclusive!(ctx);
    let result = scenarios::with_deadline(
        ctx.config.scenario_deadline,
        "bootstrap_converge",
        scenarios::run_bootstrap_converge(
            ctx.clone(),
            query.create_nodes,
            query.events_per_node,
            query.verify_polls,
        ),
    )
    .await;
    Ok(Json(result))
}
