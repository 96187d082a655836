//! JSON HTTP API over the assistant core.
//!
//! Session identity is an explicit `session_id` field — cookie handling
//! belongs to whatever fronts this service. A chat request without a session
//! id gets a fresh one minted and echoed back.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/search` | Retrieve top-k chunks and a grounded answer |
//! | `POST` | `/api/chat` | One conversational turn with session memory |
//! | `POST` | `/api/chat/clear` | Drop a session's history and uploads |
//! | `POST` | `/api/upload` | Attach a local file to the session |
//! | `POST` | `/api/incidents` | Incidents similar to a query |
//! | `POST` | `/api/incidents/filter` | Filter incidents via a natural-language query |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::ChatEngine;
use crate::config::Config;
use crate::incidents::{IncidentFilters, IncidentMatch, IncidentRecord};
use crate::models::{ChatReply, SearchAnswer};

#[derive(Clone)]
struct AppState {
    engine: Arc<ChatEngine>,
}

/// Start the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(config: &Config, engine: Arc<ChatEngine>) -> anyhow::Result<()> {
    let state = AppState { engine };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/search", post(handle_search))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/clear", post(handle_clear))
        .route("/api/upload", post(handle_upload))
        .route("/api/incidents", post(handle_incidents))
        .route("/api/incidents/filter", post(handle_incident_filter))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("safety-harness listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    filter: Option<Vec<String>>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchAnswer>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let answer = state
        .engine
        .answer_search(&req.query, req.k.unwrap_or(3), req.filter.as_deref())
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(answer))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    message: String,
    #[serde(default)]
    filter: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ChatResponse {
    session_id: String,
    #[serde(flatten)]
    reply: ChatReply,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let reply = state
        .engine
        .chat(&session_id, &req.message, req.filter.as_deref())
        .await;

    Ok(Json(ChatResponse { session_id, reply }))
}

// ============ POST /api/chat/clear ============

#[derive(Deserialize)]
struct ClearRequest {
    session_id: String,
}

#[derive(Serialize)]
struct ClearResponse {
    session_id: String,
    cleared: bool,
}

async fn handle_clear(
    State(state): State<AppState>,
    Json(req): Json<ClearRequest>,
) -> Result<Json<ClearResponse>, AppError> {
    if req.session_id.trim().is_empty() {
        return Err(bad_request("session_id must not be empty"));
    }

    let cleared = state.engine.clear_session(&req.session_id);
    Ok(Json(ClearResponse {
        session_id: req.session_id,
        cleared,
    }))
}

// ============ POST /api/upload ============

#[derive(Deserialize)]
struct UploadRequest {
    session_id: String,
    path: PathBuf,
}

#[derive(Serialize)]
struct UploadResponse {
    session_id: String,
    accepted: bool,
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    if req.session_id.trim().is_empty() {
        return Err(bad_request("session_id must not be empty"));
    }

    let accepted = state
        .engine
        .upload_file(&req.session_id, &req.path)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(UploadResponse {
        session_id: req.session_id,
        accepted,
    }))
}

// ============ POST /api/incidents ============

#[derive(Deserialize)]
struct IncidentsRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    threshold: Option<f32>,
}

#[derive(Serialize)]
struct IncidentsResponse {
    incidents: Vec<IncidentMatch>,
}

async fn handle_incidents(
    State(state): State<AppState>,
    Json(req): Json<IncidentsRequest>,
) -> Result<Json<IncidentsResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let incidents = state
        .engine
        .similar_incidents(&req.query, req.k, req.threshold)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(IncidentsResponse { incidents }))
}

// ============ POST /api/incidents/filter ============

#[derive(Deserialize)]
struct IncidentFilterRequest {
    query: String,
}

#[derive(Serialize)]
struct IncidentFilterResponse {
    filters: IncidentFilters,
    incidents: Vec<IncidentRecord>,
}

async fn handle_incident_filter(
    State(state): State<AppState>,
    Json(req): Json<IncidentFilterRequest>,
) -> Result<Json<IncidentFilterResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let (filters, incidents) = state.engine.filter_incidents(&req.query).await;
    Ok(Json(IncidentFilterResponse { filters, incidents }))
}
