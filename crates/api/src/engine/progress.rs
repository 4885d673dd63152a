//! Progress frames pushed to WebSocket clients.
//!
//! The worker RPC is poll-based; the coordinator converts its polls
//! into pushed `{type: "progress", ...}` frames. Delivery inherits the
//! broadcast semantics of [`WsManager`]: best-effort, in publish order
//! per task, slow subscribers dropped.

use axum::extract::ws::Message;
use serde::Serialize;

use crate::ws::WsManager;

/// One progress frame for one task.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub task_id: String,
    pub percentage: u8,
    #[serde(rename = "statusText")]
    pub status_text: String,
    /// True on exactly one frame per task: the terminal update.
    pub finished: bool,
    pub preview: Option<String>,
    pub results: Vec<String>,
}

impl ProgressUpdate {
    pub fn new(
        task_id: String,
        percentage: u8,
        status_text: String,
        finished: bool,
        preview: Option<String>,
        results: Vec<String>,
    ) -> Self {
        Self {
            kind: "progress",
            task_id,
            percentage,
            status_text,
            finished,
            preview,
            results,
        }
    }
}

/// Serialize one update and broadcast it to every subscriber.
pub async fn publish(ws_manager: &WsManager, update: &ProgressUpdate) {
    match serde_json::to_string(update) {
        Ok(payload) => {
            ws_manager.broadcast(Message::Text(payload.into())).await;
        }
        Err(e) => {
            tracing::error!(task_id = %update.task_id, error = %e, "Failed to serialize progress update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_serializes_to_wire_shape() {
        let update = ProgressUpdate::new(
            "17".into(),
            40,
            "Sampling".into(),
            false,
            None,
            vec![],
        );
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], json!("progress"));
        assert_eq!(value["task_id"], json!("17"));
        assert_eq!(value["statusText"], json!("Sampling"));
        assert_eq!(value["finished"], json!(false));
        assert_eq!(value["preview"], json!(null));
    }
}
