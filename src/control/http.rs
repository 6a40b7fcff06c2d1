//! HTTP + SSE transport for the control channel

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

use crate::control::{Acknowledgement, ControlChannel, OperationPayload};
use crate::recipes::RecipeError;
use crate::telemetry::{create_request_span, generate_correlation_id};

/// Result type for HTTP handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Error response carrying an HTTP status and a stable code
#[derive(Debug, Clone, Serialize, Error)]
#[error("[{status}] {message}")]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub message: String,
    pub code: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_ERROR")
    }
}

impl From<RecipeError> for ApiError {
    fn from(err: RecipeError) -> Self {
        let status = match &err {
            RecipeError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RecipeError::NoActiveInstance => StatusCode::CONFLICT,
            RecipeError::Startup { .. } | RecipeError::StepExecution { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RecipeError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, err.to_string(), err.code())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        RecipeError::validation(rejection.body_text()).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.message,
            "code": self.code,
        }));
        (self.status, body).into_response()
    }
}

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub channel: Arc<ControlChannel>,
    /// Interval between SSE keep-alive comments
    pub keep_alive: Duration,
}

impl AppState {
    pub fn new(channel: ControlChannel) -> Self {
        Self {
            channel: Arc::new(channel),
            keep_alive: Duration::from_secs(15),
        }
    }
}

/// Body of `POST /api/operations`
#[derive(Debug, Deserialize)]
pub struct CreateOperationRequest {
    /// Step list, either as serialized JSON text or inline
    pub commands: Value,
}

/// Body of `POST /api/events`
#[derive(Debug, Deserialize)]
pub struct SendEventRequest {
    /// Event tag, serialized descriptor, or inline descriptor object
    pub event: Value,
}

fn payload_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// POST /api/operations - submit a plan
pub async fn create_operation(
    State(state): State<AppState>,
    body: Result<Json<CreateOperationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Acknowledgement>)> {
    let Json(body) = body?;
    let span = create_request_span("createOperation", &generate_correlation_id());
    let ack = state
        .channel
        .create_operation(&payload_text(&body.commands))
        .instrument(span)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

/// POST /api/events - send an event to the running plan
pub async fn send_event(
    State(state): State<AppState>,
    body: Result<Json<SendEventRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Acknowledgement>)> {
    let Json(body) = body?;
    let span = create_request_span("sendEvent", &generate_correlation_id());
    let ack = state
        .channel
        .send_event(&payload_text(&body.event))
        .instrument(span)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

/// GET /api/operations/current - state of the running plan
pub async fn current_operation(
    State(state): State<AppState>,
) -> ApiResult<Json<OperationPayload>> {
    let snapshot = state
        .channel
        .current_operation()
        .await?
        .ok_or_else(|| ApiError::not_found("No recipe operation has been started"))?;
    let payload = OperationPayload::from_snapshot(&snapshot)
        .map_err(|e| ApiError::internal(format!("Failed to serialize snapshot: {e}")))?;
    Ok(Json(payload))
}

/// GET /api/operations/stream - live `operation` subscription over SSE
pub async fn operation_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    let stream = state
        .channel
        .operation()
        .map(|payload| -> Result<Event, Infallible> {
            let event = Event::default()
                .event("operation")
                .json_data(&payload)
                .unwrap_or_else(|_| Event::default().event("operation").data(payload.state));
            Ok(event)
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.keep_alive)
            .text("keep-alive"),
    )
}

/// GET /api/health - liveness and subscriber count
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let notifier = state.channel.engine().notifier();
    Json(serde_json::json!({
        "status": "ok",
        "service": "recipes",
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": notifier.subscriber_count(),
    }))
}

/// Build the router with every endpoint
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/operations", post(create_operation))
        .route("/api/operations/current", get(current_operation))
        .route("/api/operations/stream", get(operation_stream))
        .route("/api/events", post(send_event))
        .with_state(state)
}
