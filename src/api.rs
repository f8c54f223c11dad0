//! HTTP surface of the relay.
//!
//! `POST /api/generate` runs one orchestration per request. Each request gets
//! a child of the server's shutdown token; it is cancelled when the client
//! goes away (the handler future is dropped), when the orchestration budget
//! elapses, or when the server shuts down.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::GenerationError;
use crate::orchestrator::{GenerationOutcome, Orchestrator};
use crate::request::{GenerateBody, StatusQueryBody};

/// Shared state for the relay API.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Parent of every per-request cancellation token.
    pub shutdown: CancellationToken,
    pub orchestration_budget: Duration,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, orchestration_budget: Duration) -> Self {
        Self {
            orchestrator,
            shutdown: CancellationToken::new(),
            orchestration_budget,
        }
    }
}

/// The relay's public API.
pub struct RelayApi;

impl RelayApi {
    /// Build the axum router.
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/api/generate", post(generate_handler))
            .route("/api/status", post(status_handler))
            .route("/api/progress", get(progress_handler))
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

// -- Handlers --

async fn health_check() -> &'static str {
    "ok"
}

async fn generate_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let body: GenerateBody = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };

    let cancel = state.shutdown.child_token();
    // Cancels the orchestration if this future is dropped mid-flight.
    let _guard = cancel.clone().drop_guard();
    spawn_deadline(cancel.clone(), state.orchestration_budget);

    let outcome = state.orchestrator.run(body, &cancel).await;
    outcome_response(&outcome)
}

async fn status_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let body: StatusQueryBody = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };

    match state.orchestrator.check_status(body).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            tracing::warn!(code = e.code(), "Status check failed: {}", e);
            error_response(&e)
        }
    }
}

async fn progress_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": state.orchestrator.progress().status() }))
}

// -- Helpers --

/// Cancel `cancel` once `budget` has elapsed, unless it is cancelled first.
fn spawn_deadline(cancel: CancellationToken, budget: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(budget) => {
                tracing::warn!(
                    budget_secs = budget.as_secs(),
                    "Orchestration budget elapsed, cancelling"
                );
                cancel.cancel();
            }
        }
    });
}

/// Empty bodies deserialize as `{}` so that field validation reports what is
/// missing.
fn parse_body<T: DeserializeOwned + Default>(bytes: &Bytes) -> Result<T, GenerationError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| GenerationError::InvalidRequest {
        reason: format!("Invalid JSON body: {}", e),
    })
}

fn outcome_response(outcome: &GenerationOutcome) -> Response {
    (outcome.status_code(), Json(outcome.to_body())).into_response()
}

fn error_response(err: &GenerationError) -> Response {
    let mut body = serde_json::json!({
        "error": err.to_string(),
        "code": err.code(),
    });
    if let Some(details) = err.details() {
        body["details"] = details;
    }
    (err.status_code(), Json(body)).into_response()
}
