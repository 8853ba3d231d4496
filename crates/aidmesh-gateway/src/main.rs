//! Gateway binary: poll loop plus HTTP API.

use aidmesh_gateway::{api, DockerOrchestrator, GatewayConfig, GatewayContext};
use std::process::ExitCode;
use std::sync::Arc;
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

    let config = GatewayConfig::from_env();
    tracing::info!(
        http = config.http_port,
        poll_interval = ?config.poll_interval,
        nodes = config.edge_nodes.len(),
        "gateway starting"
    );

    let orchestrator = Arc::new(DockerOrchestrator::default());
    let context = GatewayContext::new(config.clone(), orchestrator);

    {
        let context = context.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(context.config.poll_interval);
            loop {
                ticker.tick().await;
                context.poll_cycle().await;
            }
        });
    }

    let router = api::build_router(context);
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
