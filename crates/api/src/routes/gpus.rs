use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use remgo_core::types::DeviceId;

use crate::state::AppState;

/// Payload of `GET /gpus`.
#[derive(Serialize)]
pub struct GpusResponse {
    pub multi_gpu_enabled: bool,
    pub gpu_count: usize,
    pub gpus: Vec<GpuInfo>,
}

/// One slot as the UI sees it.
#[derive(Serialize)]
pub struct GpuInfo {
    pub device: DeviceId,
    pub name: String,
    pub weight: u32,
    pub busy: bool,
    pub port: u16,
}

/// GET /gpus -- the current slot table.
async fn get_gpus(State(state): State<AppState>) -> Json<GpusResponse> {
    let slots = state.scheduler.slots();
    Json(GpusResponse {
        multi_gpu_enabled: state.scheduler.multi_enabled(),
        gpu_count: slots.len(),
        gpus: slots
            .into_iter()
            .map(|s| GpuInfo {
                device: s.device,
                name: s.name,
                weight: s.weight,
                busy: s.busy,
                port: s.port,
            })
            .collect(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/gpus", get(get_gpus))
}
