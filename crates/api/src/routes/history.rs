//! Generation history: outputs-tree listing joined with the metadata
//! sidecar.

use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use remgo_core::history;

use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// One history item: a generated file plus its sidecar metadata, when
/// the sidecar has a row for it.
#[derive(Serialize)]
pub struct HistoryEntry {
    pub filename: String,
    pub relative_path: String,
    pub created_epoch_seconds: i64,
    pub metadata: Option<Value>,
}

/// Paginated payload of `GET /history`.
#[derive(Serialize)]
pub struct HistoryResponse {
    pub items: Vec<HistoryEntry>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub page: usize,
    pub total_pages: usize,
}

/// GET /history?limit=N&offset=M -- newest-first listing of generated
/// images.
///
/// Sidecar failures degrade to `metadata: null` per entry; they never
/// change the item set.
async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(1);
    let offset = query.offset.unwrap_or(0);

    let all = history::scan_outputs(&state.config.outputs_dir);
    let total = all.len();

    let page_files: Vec<_> = all.into_iter().skip(offset).take(limit).collect();

    let filenames: Vec<String> = page_files.iter().map(|f| f.filename.clone()).collect();
    let mut metadata = state.metadata.find_by_filenames(&filenames).await;

    let items = page_files
        .into_iter()
        .map(|f| HistoryEntry {
            metadata: metadata.remove(&f.filename),
            filename: f.filename,
            relative_path: f.relative_path,
            created_epoch_seconds: f.created_epoch_seconds,
        })
        .collect();

    Json(HistoryResponse {
        items,
        total,
        limit,
        offset,
        page: offset / limit + 1,
        total_pages: total.div_ceil(limit),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/history", get(get_history))
}
