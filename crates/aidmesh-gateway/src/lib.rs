//! The aidmesh gateway: observes the fleet, consolidates replicas,
//! tracks divergence, and hosts the chaos surface.

pub mod api;
pub mod chaos;
pub mod config;
pub mod context;
pub mod divergence;
pub mod error;
pub mod merger;
pub mod metrics;
pub mod orchestrator;
pub mod poller;
pub mod roster;
pub mod scenarios;

pub use chaos::ChaosController;
pub use config::GatewayConfig;
pub use context::GatewayContext;
pub use divergence::{DivergenceRecord, DivergenceTracker};
pub use error::GatewayError;
pub use merger::MergedView;
pub use metrics::MetricsRegistry;
pub use orchestrator::{DockerOrchestrator, FakeOrchestrator, OrchestratorPort};
pub use poller::FleetPoller;
pub use roster::{NodeDescriptor, NodeStatus, Roster};
