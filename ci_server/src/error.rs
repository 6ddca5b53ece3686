//! Errors surfaced by the orchestrator and fix-attempt entry points.

use thiserror::Error;

use crate::store::StoreError;
use crate::worker::QueueClosed;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueClosed),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: i64,
        from: String,
        to: String,
    },

    #[error("chain {chain_id} already used {limit} auto-fix builds")]
    BoundReached { chain_id: i64, limit: u32 },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
