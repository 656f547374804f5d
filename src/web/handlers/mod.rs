pub mod api;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::error::AgentError;
use crate::ingest::IngestError;

/// Error body shared by every endpoint: `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        let status = match &err {
            AgentError::Ingest(IngestError::FileTooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            AgentError::Ingest(IngestError::UnsupportedFormat(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AgentError::Ingest(IngestError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AgentError::Ingest(_) => StatusCode::BAD_REQUEST,
            AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AgentError::SessionNotFound => StatusCode::NOT_FOUND,
            AgentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}
