//! Signaling HTTP surface
//!
//! Thin routing layer: offers go to the [`SessionManager`], capability
//! queries go to the [`PlatformDetector`]. Every error body is JSON.

use crate::errors::{CameraError, SessionError};
use crate::platform::{CapabilityReport, PlatformDetector};
use crate::session::{SessionDescription, SessionInfo, SessionManager};
use crate::types::CameraConfig;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

const BUILTIN_INDEX: &str = include_str!("../../static/index.html");

/// Shared state of the signaling routes
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub detector: PlatformDetector,
    pub static_dir: Option<PathBuf>,
}

/// Body of `POST /offer`, with an optional per-request camera override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    pub offer: SessionDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<CameraConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResponse {
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub active: usize,
    pub sessions: Vec<SessionInfo>,
}

/// Request-level failure, rendered as a status code and `{error}` body
#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    BadRequest(String),
    Internal(String),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Session(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Session(SessionError::InvalidOffer(_))
            | ApiError::Session(SessionError::Camera(CameraError::InvalidConfig(_)))
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Session(SessionError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Session(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            ApiError::Session(e) => e.to_string(),
            ApiError::BadRequest(msg) | ApiError::Internal(msg) => msg,
        };
        if status.is_server_error() {
            log::error!("Request failed ({}): {}", status, error);
        } else {
            log::warn!("Rejected request ({}): {}", status, error);
        }
        (status, Json(ErrorResponse { error })).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(index))
        .route("/offer", post(offer))
        .route("/camera-info", get(camera_info))
        .route("/sessions", get(sessions));

    if let Some(dir) = &state.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

/// Serve until `shutdown` resolves, then close every session.
pub async fn run<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let manager = state.manager.clone();
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;

    manager.shutdown_all().await;
    log::info!("All sessions closed");
    result
}

async fn index(State(state): State<AppState>) -> Html<String> {
    if let Some(dir) = &state.static_dir {
        match tokio::fs::read_to_string(dir.join("index.html")).await {
            Ok(page) => return Html(page),
            Err(e) => log::debug!("No index.html in {:?} ({}), using built-in page", dir, e),
        }
    }
    Html(BUILTIN_INDEX.to_string())
}

async fn offer(
    State(state): State<AppState>,
    payload: Result<Json<OfferRequest>, JsonRejection>,
) -> Result<Json<OfferResponse>, ApiError> {
    let Json(request) = payload?;
    let config = request
        .camera
        .unwrap_or_else(|| state.manager.config().clone());

    // Detached so a dropped request cannot strand a half-built session
    let manager = state.manager.clone();
    let answer = tokio::spawn(async move { manager.create_session_with(request.offer, config).await })
        .await
        .map_err(|e| ApiError::Internal(format!("session task failed: {}", e)))??;

    Ok(Json(OfferResponse { answer }))
}

async fn camera_info(State(state): State<AppState>) -> Result<Json<CapabilityReport>, ApiError> {
    let detector = state.detector.clone();
    let config = state.manager.config().clone();
    let report = tokio::task::spawn_blocking(move || detector.capability_report(&config))
        .await
        .map_err(|e| ApiError::Internal(format!("camera enumeration failed: {}", e)))?;
    Ok(Json(report))
}

async fn sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let sessions = state.manager.list_sessions().await;
    Json(SessionsResponse {
        active: sessions.len(),
        sessions,
    })
}
