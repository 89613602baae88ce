//! REST API server for the analysis agent

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::AgentError;
use crate::models::QueryRequest;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryBody {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<Agent>,
}

fn status_for(error: &AgentError) -> StatusCode {
    if error.is_gateway_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else if matches!(error, AgentError::InvalidRequest(_)) {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Query Endpoint
/// =============================

async fn run_query(
    State(state): State<ApiState>,
    Json(req): Json<QueryBody>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(session_id = ?req.session_id, "Received query: {}", req.question);

    let request = QueryRequest {
        query: req.question,
        session_id: req.session_id,
    };

    match state.agent.run(request).await {
        Ok(response) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "answer": response.answer,
                "run_id": response.run_id,
                "tasks": response.tasks,
                "task_reports": response.task_reports,
                "budget_exhausted": response.budget_exhausted,
                "reasoning_trace": response.reasoning_trace,
                "execution_time_ms": response.execution_time_ms,
            }))),
        ),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!(error = %e, "Query failed");
            } else {
                warn!(error = %e, "Query rejected");
            }
            (status, Json(ApiResponse::error(format!("Query failed: {}", e))))
        }
    }
}

/// =============================
/// Audit Endpoint
/// =============================

async fn get_run(
    State(state): State<ApiState>,
    Path(run_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    let audit_log = state.agent.audit_log();

    match audit_log.get(run_id).await {
        Ok(Some(record)) => {
            let verified = audit_log.verify_integrity(run_id).await.unwrap_or(false);
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "record": record,
                    "integrity_verified": verified,
                }))),
            )
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Run {} not found", run_id))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Audit lookup failed: {}", e))),
        ),
    }
}

/// =============================
/// Session Memory Endpoint
/// =============================

async fn clear_session_memory(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let cleared = state.agent.clear_session(&session_id).await;
    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "session_id": session_id,
            "cleared": cleared,
        }))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(agent: Arc<Agent>) -> Router {
    let state = ApiState { agent };

    Router::new()
        .route("/health", get(health))
        .route("/api/query", post(run_query))
        .route("/api/runs/:run_id", get(get_run))
        .route("/api/sessions/:session_id/memory", delete(clear_session_memory))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    agent: Arc<Agent>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(agent);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
