//! HTTP control plane
//!
//! `POST /start`, `POST /stop` and `GET /status`, all behind a bearer token.

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::control::WorkerManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<WorkerManager>,
    pub token: Arc<str>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::MissingToken => StatusCode::UNAUTHORIZED,
            AuthError::InvalidToken => StatusCode::FORBIDDEN,
        };
        tracing::warn!(%status, "Rejected control request: {}", self);
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct LifecycleResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    running: bool,
    refresh_min: u64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/start", post(start_worker))
        .route("/stop", post(stop_worker))
        .route("/status", get(worker_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    if presented != &*state.token {
        return Err(AuthError::InvalidToken);
    }
    Ok(next.run(request).await)
}

async fn start_worker(State(state): State<AppState>) -> Json<LifecycleResponse> {
    Json(LifecycleResponse {
        status: state.manager.start().as_str(),
    })
}

async fn stop_worker(State(state): State<AppState>) -> Json<LifecycleResponse> {
    Json(LifecycleResponse {
        status: state.manager.stop().as_str(),
    })
}

async fn worker_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.manager.is_running(),
        refresh_min: state.manager.refresh_minutes(),
    })
}
