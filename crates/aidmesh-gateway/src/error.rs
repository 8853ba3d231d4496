//! Error types for gateway operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("another operation is in progress")]
    Busy,

    #[error("orchestrator failure: {0}")]
    OrchestratorFailure(String),
}
