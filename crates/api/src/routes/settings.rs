use axum::extract::State;
use axum::{routing::get, Json, Router};

use remgo_core::catalog::{self, CatalogSnapshot};

use crate::state::AppState;

/// GET /settings -- the full catalog the UI populates its controls from.
///
/// Recomputed from disk on every call; the inventory is small and the
/// endpoint is only hit at UI startup.
async fn get_settings(State(state): State<AppState>) -> Json<CatalogSnapshot> {
    let snapshot = catalog::build_snapshot(&state.config.catalog_paths());
    Json(snapshot)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings))
}
