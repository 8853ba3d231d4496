//! Edge node binary: one replica, HTTP intake, UDP gossip.

use aidmesh_node::{build_router, GossipService, GossipStats, NodeConfig, NodeContext};
use aidmesh_replica::ReplicaStore;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aidmesh=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env();
    tracing::info!(
        node_id = config.node_id,
        http = config.http_port,
        gossip = config.gossip_port,
        peers = ?config.peers,
        "node starting"
    );

    let store = match ReplicaStore::open(&config.node_id, &config.logs_dir()) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::error!(error = %err, "ledger refused to load");
            return ExitCode::FAILURE;
        }
    };

    let gossip_stats = Arc::new(GossipStats::default());
    let gossip = match GossipService::bind(
        &config.node_id,
        &format!("0.0.0.0:{}", config.gossip_port),
        config.peers.clone(),
        config.gossip_interval,
        store.clone(),
        gossip_stats.clone(),
    )
    .await
    {
        Ok(gossip) => gossip,
        Err(err) => {
            tracing::error!(error = %err, port = config.gossip_port, "gossip bind failed");
            return ExitCode::FAILURE;
        }
    };
    tokio::spawn(gossip.run());

    let context = Arc::new(NodeContext {
        store,
        gossip_stats,
        started_at: Instant::now(),
        config: config.clone(),
    });
    let router = build_router(context);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, port = config.http_port, "http bind failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = axum::serve(listener, router).await {
        tracing::error!(error = %err, "http server stopped");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
