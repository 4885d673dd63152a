//! Generation endpoints: submit, status, and global stop.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use remgo_core::args::{validate_args, GenerateParams};
use remgo_core::error::CoreError;

use crate::engine::coordinator::{GpuShare, TaskSnapshot};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Payload of `POST /generate`.
#[derive(Serialize)]
pub struct GenerateResponse {
    pub task_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpus: Option<Vec<GpuShare>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_images: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /generate -- start a generation task.
///
/// The body is a loosely-typed request: absent or mistyped fields take
/// their defaults and never fail the call. The one hard rejection is a
/// caller-supplied raw `fooocus_args` override that does not pass the
/// positional contract; that is refused here, before any worker is
/// contacted.
async fn generate(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> AppResult<Json<GenerateResponse>> {
    let raw_args = match body.get("fooocus_args") {
        None => None,
        Some(Value::Array(raw)) => {
            validate_args(raw).map_err(AppError::Core)?;
            Some(raw.clone())
        }
        Some(other) => {
            return Err(AppError::Core(CoreError::Validation(format!(
                "fooocus_args must be an array, got {other}"
            ))));
        }
    };

    let params = GenerateParams::from_request(&body);
    let outcome = std::sync::Arc::clone(&state.coordinator)
        .submit(params, raw_args)
        .await;

    let response = if outcome.started {
        GenerateResponse {
            task_id: outcome.task_id,
            status: "Started",
            gpus: Some(outcome.assignments.into_iter().map(GpuShare::from).collect()),
            total_images: Some(outcome.total_images),
            error: None,
        }
    } else {
        GenerateResponse {
            task_id: outcome.task_id,
            status: "Error",
            gpus: None,
            total_images: None,
            error: outcome.error,
        }
    };

    Ok(Json(response))
}

/// GET /status/{task_id} -- authoritative task snapshot.
///
/// WebSocket frames are best-effort; clients that need a guaranteed
/// completion answer poll this.
async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<TaskSnapshot>> {
    state
        .coordinator
        .snapshot(&task_id)
        .map(Json)
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Task",
            id: task_id,
        }))
}

/// Payload of `POST /stop`.
#[derive(Serialize)]
pub struct StopResponse {
    /// Number of live tasks the cancel reached.
    pub requested: usize,
    pub success: bool,
}

/// POST /stop -- global best-effort cancel of every in-flight task.
async fn stop_all(State(state): State<AppState>) -> Json<StopResponse> {
    let (requested, success) = state.coordinator.cancel_all().await;
    Json(StopResponse { requested, success })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/status/{task_id}", get(task_status))
        .route("/stop", post(stop_all))
}
