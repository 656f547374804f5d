use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::StatusCode,
    Json,
};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::ApiError;
use crate::agent::{ChatResponse, SessionInfo, UploadResponse};
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub active_sessions: usize,
    pub llm_available: bool,
    pub llm_backend: Option<String>,
    pub session_ttl_seconds: u64,
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Accepts a multipart upload with a `file` field and opens a session for it.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let start = Instant::now();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
        debug!("Received upload {} ({} bytes)", filename, bytes.len());

        let response = state.agent.create_session(bytes.to_vec(), &filename).await?;
        info!(
            "Session {} created from {} in {}ms",
            response.session_id,
            filename,
            start.elapsed().as_millis()
        );
        return Ok(Json(response));
    }

    Err(ApiError::new(
        StatusCode::BAD_REQUEST,
        "Multipart field `file` is required",
    ))
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::new(e.status(), e.body_text()))?;
    let start = Instant::now();
    let response = state.agent.ask(&request.session_id, &request.message).await?;
    debug!(
        "Chat turn for session {} answered in {}ms",
        request.session_id,
        start.elapsed().as_millis()
    );
    Ok(Json(response))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    Ok(Json(state.agent.session_info(&id)?))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.agent.delete_session(&id)?;
    info!("Session {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let status = state.agent.status();
    let uptime = chrono::Utc::now().signed_duration_since(state.startup_time);

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds(),
        active_sessions: status.active_sessions,
        llm_available: status.llm_available,
        llm_backend: status.llm_backend,
        session_ttl_seconds: status.session_ttl_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{agent_with, limits, FixedSql};
    use crate::config::AppConfig;
    use crate::llm::LlmManager;
    use crate::web::build_router;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "nltableboundary";

    fn app(llm: LlmManager) -> Router {
        let config = AppConfig::default();
        let agent = Arc::new(agent_with(llm, limits()));
        build_router(Arc::new(AppState::new(config, agent)))
    }

    fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(multipart_body(field, filename, content)))
            .unwrap()
    }

    fn chat_request(session_id: &str, message: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("Content-Type", "application/json")
            .body(Body::from(
                json!({ "session_id": session_id, "message": message }).to_string(),
            ))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn upload(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(upload_request("file", "sales.csv", b"region,amount\nnorth,10\nsouth,32\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        json["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = app(LlmManager::disabled())
            .oneshot(Request::builder().uri("/api/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_upload_returns_schema_and_preview() {
        let response = app(LlmManager::disabled())
            .oneshot(upload_request("file", "sales.csv", b"region,amount\nnorth,10\nsouth,32\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["schema"][0]["name"], "region");
        assert_eq!(json["schema"][1]["pandas_dtype"], "int64");
        assert_eq!(json["schema"][1]["kind"], "numeric");
        assert_eq!(json["preview"]["columns"], json!(["region", "amount"]));
        assert_eq!(json["preview"]["rows"][1]["amount"], 32);
        assert_eq!(json["preview"]["row_count"], 2);
        assert_eq!(json["preview"]["column_count"], 2);
    }

    #[tokio::test]
    async fn test_upload_errors_map_to_status() {
        let app = app(LlmManager::disabled());

        let response = app.clone().oneshot(upload_request("file", "empty.csv", b"")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["detail"].is_string());

        let response = app
            .clone()
            .oneshot(upload_request("file", "image.png", &[0x89, 0x50, 0x4e, 0x47, 0x00, 0xff, 0xfe]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let response = app
            .oneshot(upload_request("attachment", "sales.csv", b"a\n1\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["detail"], "Multipart field `file` is required");
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let llm = LlmManager::with_client(
            Box::new(FixedSql("SELECT SUM(\"amount\") AS total FROM data")),
            Duration::from_secs(5),
        );
        let app = app(llm);
        let session_id = upload(&app).await;

        let response = app.oneshot(chat_request(&session_id, "Total amount?")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["answer"], "total = 42");
        assert_eq!(json["sql"], "SELECT SUM(\"amount\") AS total FROM data");
        assert_eq!(json["explanation"], "fixed");
        assert_eq!(json["result_preview"]["columns"], json!(["total"]));
        assert_eq!(json["result_preview"]["rows"][0]["total"], 42);
        assert_eq!(json["result_preview"]["truncated"], false);
    }

    #[tokio::test]
    async fn test_chat_without_llm_still_answers() {
        let app = app(LlmManager::disabled());
        let session_id = upload(&app).await;

        let response = app.oneshot(chat_request(&session_id, "anything")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert!(json["answer"].as_str().unwrap().contains("not configured"));
        assert!(json["sql"].is_null());
        assert!(json["result_preview"].is_null());
    }

    #[tokio::test]
    async fn test_chat_errors() {
        let app = app(LlmManager::disabled());

        let response = app.clone().oneshot(chat_request("nope", "hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["detail"], "Session not found or expired");

        let session_id = upload(&app).await;
        let response = app.clone().oneshot(chat_request(&session_id, "  ")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"session_id": 7}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
        assert!(json_body(response).await["detail"].is_string());
    }

    #[tokio::test]
    async fn test_session_info_and_delete() {
        let app = app(LlmManager::disabled());
        let session_id = upload(&app).await;
        let uri = format!("/api/sessions/{}", session_id);

        let response = app
            .clone()
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["session_id"], session_id.as_str());
        assert_eq!(json["row_count"], 2);

        let delete = || Request::builder().method("DELETE").uri(&uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(chat_request(&session_id, "hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status() {
        let app = app(LlmManager::disabled());
        upload(&app).await;

        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["active_sessions"], 1);
        assert_eq!(json["llm_available"], false);
        assert_eq!(json["session_ttl_seconds"], 3600);
    }
}
