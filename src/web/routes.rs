use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for the upload/chat workflow
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            .route("/healthz", get(handlers::api::healthz))
            // Session lifecycle
            .route("/upload", post(handlers::api::upload_file))
            .route(
                "/sessions/{id}",
                get(handlers::api::get_session).delete(handlers::api::delete_session),
            )
            // Questions
            .route("/chat", post(handlers::api::chat))
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
