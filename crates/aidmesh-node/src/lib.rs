//! Edge node: event intake over HTTP, replica diffusion over UDP gossip.

pub mod config;
pub mod gossip;
pub mod intake;

pub use config::NodeConfig;
pub use gossip::{GossipService, GossipStats};
pub use intake::{build_router, NodeContext};
