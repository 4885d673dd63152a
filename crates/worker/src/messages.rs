//! JSON-RPC 2.0 wire types for the worker stdio channel.
//!
//! One JSON object per line in each direction. Requests carry a
//! monotonic integer `id`; stdout lines that do not parse as a response
//! with an `id` are worker log output and are forwarded to the server
//! log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version sent with every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// RPC method names (the complete worker API).
pub const METHOD_HEALTH: &str = "health";
pub const METHOD_GENERATE: &str = "generate";
pub const METHOD_PROGRESS: &str = "progress";
pub const METHOD_STOP: &str = "stop";

/// Outbound request envelope.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

/// Inbound response envelope.
///
/// `id` is optional so that arbitrary JSON log lines (no `id`) can be
/// told apart from responses after a successful parse.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

/// Error body of a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Typed method payloads
// ---------------------------------------------------------------------------

/// Params of `generate`: the versioned positional args vector.
#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    pub task_id: String,
    pub fooocus_args: Vec<Value>,
    pub fooocus_args_contract_version: u32,
}

/// Result of `health`.
#[derive(Debug, Deserialize)]
pub struct HealthResult {
    pub status: String,
}

/// Result of `progress`: one sub-task snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressReport {
    #[serde(default)]
    pub percentage: i64,
    #[serde(rename = "statusText", default)]
    pub status_text: String,
    #[serde(default)]
    pub finished: bool,
    /// Base64 preview frame, when the worker has one.
    #[serde(default)]
    pub preview: Option<String>,
    /// Output paths relative to the outputs directory.
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of `stop`.
#[derive(Debug, Deserialize)]
pub struct StopResult {
    #[serde(default)]
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_to_envelope() {
        let req = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: 3,
            method: METHOD_PROGRESS,
            params: json!({"task_id": "17_0"}),
        };
        let line = serde_json::to_string(&req).unwrap();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["jsonrpc"], json!("2.0"));
        assert_eq!(parsed["id"], json!(3));
        assert_eq!(parsed["method"], json!("progress"));
        assert_eq!(parsed["params"]["task_id"], json!("17_0"));
    }

    #[test]
    fn progress_report_parses_full_payload() {
        let report: ProgressReport = serde_json::from_value(json!({
            "percentage": 40,
            "statusText": "Sampling step 12/30",
            "finished": false,
            "preview": "aGk=",
            "results": [],
        }))
        .unwrap();
        assert_eq!(report.percentage, 40);
        assert_eq!(report.status_text, "Sampling step 12/30");
        assert!(!report.finished);
        assert_eq!(report.preview.as_deref(), Some("aGk="));
    }

    #[test]
    fn progress_report_defaults_missing_fields() {
        let report: ProgressReport = serde_json::from_value(json!({})).unwrap();
        assert_eq!(report.percentage, 0);
        assert!(report.results.is_empty());
        assert!(report.error.is_none());
    }

    #[test]
    fn response_without_id_is_detectable() {
        let resp: RpcResponse =
            serde_json::from_str(r#"{"loaded": "model", "device": 0}"#).unwrap();
        assert!(resp.id.is_none());
    }
}
