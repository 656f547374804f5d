use thiserror::Error;

use crate::db::session_store::StoreError;
use crate::ingest::IngestError;

/// Errors surfaced by the agent to its callers. Translation problems never
/// appear here; they are reported as answer text.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Session not found or expired")]
    SessionNotFound,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AgentError::SessionNotFound,
        }
    }
}

impl From<duckdb::Error> for AgentError {
    fn from(err: duckdb::Error) -> Self {
        AgentError::Internal(format!("Database error: {}", err))
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(err: tokio::task::JoinError) -> Self {
        AgentError::Internal(format!("Background task failed: {}", err))
    }
}
