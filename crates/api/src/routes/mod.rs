pub mod config_editor;
pub mod generation;
pub mod gpus;
pub mod health;
pub mod history;
pub mod settings;

use std::path::Path;

use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;

use crate::state::AppState;
use crate::ws;

/// Build the full route tree.
///
/// ```text
/// /health              liveness probe
/// /settings            catalog snapshot for the UI
/// /gpus                GPU slot table
/// /generate            start a generation task (POST)
/// /status/{task_id}    task snapshot
/// /stop                cancel all in-flight tasks (POST)
/// /history             outputs listing with sidecar metadata
/// /config/editor       read/write the launcher config (GET, POST)
/// /images/...          generated images (static files)
/// /ws                  progress WebSocket
/// ```
pub fn router(outputs_dir: &Path) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(settings::router())
        .merge(gpus::router())
        .merge(generation::router())
        .merge(history::router())
        .merge(config_editor::router())
        .route("/ws", get(ws::ws_handler))
        .nest_service("/images", ServeDir::new(outputs_dir))
}
