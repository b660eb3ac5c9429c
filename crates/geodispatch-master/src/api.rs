use crate::registry::{SessionId, SessionInfo};
use crate::scheduler::{Scheduler, StatusReport};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Status and metrics routes
pub fn create_status_api(scheduler: Arc<Scheduler>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:session_id", get(get_session))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(scheduler)
}

/// Serve the status API until the scheduler shuts down
pub async fn serve_status_api(scheduler: Arc<Scheduler>, addr: String) -> anyhow::Result<()> {
    let shutdown = scheduler.shutdown().clone();
    let app = create_status_api(scheduler);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Status API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    active_sessions: usize,
    pending_items: usize,
}

async fn health_check(State(scheduler): State<Arc<Scheduler>>) -> Json<HealthResponse> {
    let status = if scheduler.shutdown().is_cancelled() {
        "shutting_down"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        active_sessions: scheduler.registry().count(),
        pending_items: scheduler.queue().len(),
    })
}

async fn status(State(scheduler): State<Arc<Scheduler>>) -> Json<StatusReport> {
    Json(scheduler.status())
}

async fn list_sessions(State(scheduler): State<Arc<Scheduler>>) -> Json<Vec<SessionInfo>> {
    Json(scheduler.registry().all_sessions())
}

async fn get_session(
    State(scheduler): State<Arc<Scheduler>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionInfo>, ApiError> {
    scheduler
        .registry()
        .get(&session_id)
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn metrics(State(scheduler): State<Arc<Scheduler>>) -> Result<String, ApiError> {
    scheduler
        .metrics()
        .render()
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[derive(Debug)]
enum ApiError {
    NotFound,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
