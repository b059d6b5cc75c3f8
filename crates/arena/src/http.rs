//! HTTP API and viewer event streams.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use futures_util::Stream;
use protocol::MatchSettings;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::hand_log::HandLogError;
use crate::identity::PlayerId;
use crate::session::{SessionError, SessionId, SessionInfo, Supervisor};

/// Body returned when a player has no hand log.
pub const NO_LOGS: &str = "no logs yet";

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

/// Builds the router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/{id}", delete(terminate_session))
        .route("/api/sessions/{id}/events", get(session_events))
        .route("/api/sessions/{id}/action", post(human_action))
        .route("/api/sessions/{id}/next", post(next_hand))
        .route("/api/logs/{player}", get(player_log))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error response with a JSON `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            SessionError::UnknownSession(_) => StatusCode::NOT_FOUND,
            SessionError::CapacityReached(_) => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::SpawnFailed(_) | SessionError::WriteFailed(_) | SessionError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<HandLogError> for ApiError {
    fn from(err: HandLogError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        } else {
            tracing::debug!(status = %self.status, error = %self.message, "Request rejected");
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub player: String,
    #[serde(default)]
    pub settings: MatchSettings,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub act: u8,
    #[serde(default)]
    pub iters: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NextHandRequest {
    #[serde(default)]
    pub iters: Option<u32>,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.supervisor.registry().len(),
    })
}

/// POST /api/sessions
async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let session_id = state
        .supervisor
        .create_session(&request.player, request.settings)
        .await?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

/// GET /api/sessions
async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.supervisor.registry().list().await)
}

/// GET /api/sessions/{id}/events
async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let viewer = state.supervisor.subscribe(&id).await?;
    tracing::debug!(session_id = %id, viewer_id = viewer.id(), "Event stream opened");

    let stream = viewer
        .into_stream()
        .map(|payload| Ok(Event::default().data(&*payload)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /api/sessions/{id}/action
async fn human_action(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(request): Json<ActionRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .supervisor
        .human_action(&id, request.act, request.iters)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/sessions/{id}/next
///
/// The body is optional.
async fn next_hand(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        NextHandRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?
    };
    state.supervisor.next_hand(&id, request.iters).await?;
    Ok(StatusCode::ACCEPTED)
}

/// DELETE /api/sessions/{id}
async fn terminate_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    state.supervisor.terminate_session(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/logs/{player}
async fn player_log(
    State(state): State<AppState>,
    Path(player): Path<String>,
) -> Result<String, ApiError> {
    let player = PlayerId::parse(&player)?;
    let contents = state.supervisor.store().read(&player).await?;
    Ok(contents.unwrap_or_else(|| NO_LOGS.to_string()))
}
