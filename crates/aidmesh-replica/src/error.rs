//! Error types for replica operations.

use thiserror::Error;

/// Errors surfaced by the replica layer.
#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid replica payload: {0}")]
    InvalidReplica(String),

    #[error("ledger corrupt at seq {seq}")]
    LogCorruption { seq: u64 },

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReplicaError {
    pub fn encoding(err: serde_json::Error) -> Self {
        ReplicaError::Encoding(err.to_string())
    }
}
