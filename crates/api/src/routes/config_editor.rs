//! Config-editor endpoints over the flat launcher config document.
//!
//! The editable schema is discovered from the companion tutorial file;
//! updates are strictly type-checked against it and take effect on the
//! next restart.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Map, Value};

use remgo_core::config_doc;

use crate::error::AppResult;
use crate::state::AppState;

/// Payload of `GET /config/editor`.
#[derive(Serialize)]
pub struct ConfigEditorResponse {
    /// Current document contents (possibly empty before first save).
    pub config: Map<String, Value>,
    /// Known keys with example values defining their expected types.
    pub schema: Map<String, Value>,
}

/// GET /config/editor -- current document plus the discovered schema.
async fn get_config(State(state): State<AppState>) -> AppResult<Json<ConfigEditorResponse>> {
    let config = config_doc::load_document(&state.config.config_doc_path)?;
    let schema = config_doc::load_schema(&state.config.config_tutorial_path)?;
    Ok(Json(ConfigEditorResponse { config, schema }))
}

/// Payload of `POST /config/editor`.
#[derive(Serialize)]
pub struct ConfigUpdateResponse {
    pub updated: usize,
    /// The server never hot-reloads this document.
    pub restart_required: bool,
}

/// POST /config/editor -- apply a flat patch of key/value updates.
///
/// Every key must exist in the schema with a matching JSON type; the
/// write is all-or-nothing.
async fn update_config(
    State(state): State<AppState>,
    Json(patch): Json<Map<String, Value>>,
) -> AppResult<Json<ConfigUpdateResponse>> {
    let mut doc = config_doc::load_document(&state.config.config_doc_path)?;
    let schema = config_doc::load_schema(&state.config.config_tutorial_path)?;

    let updated = config_doc::apply_update(&mut doc, &schema, &patch)?;
    config_doc::save_document(&state.config.config_doc_path, &doc)?;

    tracing::info!(updated, "Config document updated, restart required to apply");
    Ok(Json(ConfigUpdateResponse {
        updated,
        restart_required: true,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/config/editor", get(get_config).post(update_config))
}
