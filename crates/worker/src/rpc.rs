//! Line-delimited JSON-RPC client over a worker's stdio streams.
//!
//! A single writer serializes requests onto the worker's stdin; one
//! reader task drains stdout and completes pending calls by `id`.
//! Stdout lines that are not responses are forwarded to the server log.
//! When the stream ends (worker exited) every outstanding call fails
//! with [`RpcError::WorkerExited`].
//!
//! The client is generic over the underlying streams so the protocol
//! can be exercised in tests over an in-memory duplex pipe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};

use crate::messages::{
    GenerateRequest, HealthResult, ProgressReport, RpcRequest, RpcResponse, StopResult,
    JSONRPC_VERSION, METHOD_GENERATE, METHOD_HEALTH, METHOD_PROGRESS, METHOD_STOP,
};

/// Transport-level RPC failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("RPC call '{0}' timed out")]
    Timeout(String),

    #[error("worker exited")]
    WorkerExited,

    #[error("malformed RPC response: {0}")]
    Malformed(String),

    #[error("worker error: {0}")]
    Remote(String),
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>>;

/// JSON-RPC client bound to one worker process.
pub struct RpcClient {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl RpcClient {
    /// Wire a client over a reader/writer pair and start the reader task.
    ///
    /// `device` is only used to tag forwarded worker log lines.
    pub fn new<R, W>(reader: R, writer: W, device: u32) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let client = Arc::new(Self {
            writer: Mutex::new(Box::new(writer)),
            pending: Arc::clone(&pending),
            next_id: AtomicU64::new(0),
            closed: Arc::clone(&closed),
        });

        tokio::spawn(read_loop(reader, pending, closed, device));

        client
    }

    /// Whether the worker side of the channel has gone away.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Issue one RPC call and wait for its correlated response.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::WorkerExited);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        };
        let mut line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(RpcError::Malformed(format!("failed to encode request: {e}")));
            }
        };
        line.push('\n');

        {
            let mut writer = self.writer.lock().await;
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.flush().await.is_err()
            {
                self.pending.lock().await.remove(&id);
                return Err(RpcError::WorkerExited);
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without completing: reader task is gone.
            Ok(Err(_)) => Err(RpcError::WorkerExited),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::Timeout(method.to_string()))
            }
        }
    }

    // -- Typed methods --

    /// Readiness probe.
    pub async fn health(&self, timeout: Duration) -> Result<HealthResult, RpcError> {
        let result = self.call(METHOD_HEALTH, json!({}), timeout).await?;
        decode(result)
    }

    /// Enqueue a generation sub-task. Returns after acceptance, not
    /// completion.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<(), RpcError> {
        let params = serde_json::to_value(request)
            .map_err(|e| RpcError::Malformed(format!("failed to encode generate params: {e}")))?;
        self.call(METHOD_GENERATE, params, timeout).await?;
        Ok(())
    }

    /// Poll one sub-task's progress.
    pub async fn progress(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<ProgressReport, RpcError> {
        let result = self
            .call(METHOD_PROGRESS, json!({ "task_id": task_id }), timeout)
            .await?;
        decode(result)
    }

    /// Cancel the worker's currently running task (best-effort).
    pub async fn stop(&self, timeout: Duration) -> Result<StopResult, RpcError> {
        let result = self.call(METHOD_STOP, json!({}), timeout).await?;
        decode(result)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::Malformed(e.to_string()))
}

/// Drain worker stdout: complete pending calls, forward everything else
/// to the log. Ends at EOF, failing all outstanding calls.
async fn read_loop<R>(reader: R, pending: PendingMap, closed: Arc<AtomicBool>, device: u32)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RpcResponse>(trimmed) {
                    Ok(response) if response.id.is_some() => {
                        dispatch(&pending, response).await;
                    }
                    _ => {
                        // Not a response: plain worker log output.
                        tracing::info!(device, "[worker] {trimmed}");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(device, error = %e, "Failed to read worker stdout");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(RpcError::WorkerExited));
    }
    tracing::debug!(device, "Worker RPC channel closed");
}

async fn dispatch(pending: &PendingMap, response: RpcResponse) {
    let id = response.id.expect("caller checked id");
    let Some(tx) = pending.lock().await.remove(&id) else {
        // Late reply for a timed-out call; nothing to complete.
        return;
    };

    let outcome = if response.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
        Err(RpcError::Malformed(format!(
            "response {id} is not JSON-RPC 2.0"
        )))
    } else if let Some(error) = response.error {
        Err(RpcError::Remote(error.message))
    } else {
        Ok(response.result.unwrap_or(Value::Null))
    };

    let _ = tx.send(outcome);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    /// Spawn a scripted fake worker over an in-memory pipe and return
    /// the client wired to it.
    ///
    /// The handler receives each parsed request and returns the raw
    /// line(s) to write back, or `None` to stay silent.
    fn fake_worker<F>(mut handler: F) -> Arc<RpcClient>
    where
        F: FnMut(RpcRequest0) -> Option<String> + Send + 'static,
    {
        let (client_io, worker_io) = duplex(64 * 1024);
        let (worker_read, mut worker_write) = tokio::io::split(worker_io);
        let (client_read, client_write) = tokio::io::split(client_io);

        tokio::spawn(async move {
            let mut lines = BufReader::new(worker_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: RpcRequest0 = serde_json::from_str(&line).unwrap();
                if let Some(reply) = handler(request) {
                    worker_write.write_all(reply.as_bytes()).await.unwrap();
                    worker_write.write_all(b"\n").await.unwrap();
                }
            }
        });

        RpcClient::new(client_read, client_write, 0)
    }

    /// Owned mirror of the request envelope for test-side parsing.
    #[derive(Debug, serde::Deserialize)]
    struct RpcRequest0 {
        id: u64,
        method: String,
    }

    #[tokio::test]
    async fn call_correlates_by_id() {
        let client = fake_worker(|req| {
            Some(format!(
                r#"{{"jsonrpc": "2.0", "id": {}, "result": {{"status": "ok"}}}}"#,
                req.id
            ))
        });

        let health = client.health(Duration::from_secs(1)).await.unwrap();
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn non_json_lines_are_ignored_as_logs() {
        let client = fake_worker(|req| {
            Some(format!(
                "[Worker 0] loading model weights\n{{\"jsonrpc\": \"2.0\", \"id\": {}, \"result\": {{\"status\": \"ok\"}}}}",
                req.id
            ))
        });

        let health = client.health(Duration::from_secs(1)).await.unwrap();
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn error_response_surfaces_remote_message() {
        let client = fake_worker(|req| {
            Some(format!(
                r#"{{"jsonrpc": "2.0", "id": {}, "error": {{"message": "contract version mismatch"}}}}"#,
                req.id
            ))
        });

        let err = client
            .call(METHOD_GENERATE, json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            RpcError::Remote(message) => assert!(message.contains("mismatch")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_2_0_response_is_malformed() {
        let client = fake_worker(|req| {
            Some(format!(r#"{{"jsonrpc": "1.0", "id": {}, "result": 1}}"#, req.id))
        });

        let err = client
            .call(METHOD_HEALTH, json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Malformed(_)));
    }

    #[tokio::test]
    async fn silent_worker_times_out() {
        let client = fake_worker(|_| None);

        let err = client
            .call(METHOD_PROGRESS, json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
    }

    #[tokio::test]
    async fn eof_fails_outstanding_and_later_calls() {
        let (client_io, worker_io) = duplex(1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let client = RpcClient::new(client_read, client_write, 0);

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call(METHOD_PROGRESS, json!({}), Duration::from_secs(5))
                    .await
            })
        };

        // Give the call a moment to register, then hang up.
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(worker_io);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::WorkerExited));

        let err = client
            .call(METHOD_HEALTH, json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::WorkerExited));
    }

    #[tokio::test]
    async fn concurrent_calls_resolve_out_of_order() {
        // Replies arrive in reverse: buffer the first, answer on the second.
        let buffered: std::sync::Mutex<Vec<(u64, String)>> = std::sync::Mutex::new(Vec::new());
        let client = fake_worker(move |req| {
            let mut held = buffered.lock().unwrap();
            held.push((req.id, req.method.clone()));
            if held.len() < 2 {
                return None;
            }
            let replies: Vec<String> = held
                .drain(..)
                .rev()
                .map(|(id, method)| {
                    format!(r#"{{"jsonrpc": "2.0", "id": {id}, "result": {{"echo": "{method}"}}}}"#)
                })
                .collect();
            Some(replies.join("\n"))
        });

        let a = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call("health", json!({}), Duration::from_secs(1))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b = client.call("stop", json!({}), Duration::from_secs(1)).await;

        assert_eq!(b.unwrap()["echo"], json!("stop"));
        assert_eq!(a.await.unwrap().unwrap()["echo"], json!("health"));
    }
}
