//! Worker process lifecycle.
//!
//! [`WorkerSupervisor`] spawns one inference worker per GPU slot, owns
//! its stdio, probes it for readiness, and exposes the typed RPC API
//! the task coordinator drives. Created once at startup; the returned
//! `Arc` is cheaply cloned into request handlers.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use remgo_core::args::{validate_args, ARGS_CONTRACT_VERSION};
use remgo_core::error::CoreError;
use remgo_core::scheduler::GpuSlot;
use remgo_core::types::DeviceId;

use crate::events::WorkerEvent;
use crate::messages::{GenerateRequest, ProgressReport};
use crate::rpc::{RpcClient, RpcError};

/// Readiness probe attempts (1 s cooldown each, ~60 s budget).
const HEALTH_PROBE_ATTEMPTS: u32 = 60;

/// Cooldown between readiness probe attempts.
const HEALTH_PROBE_COOLDOWN: Duration = Duration::from_secs(1);

/// Per-probe RPC timeout.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timeout for progress/stop calls.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for generate acceptance (the worker may be mid-load).
const GENERATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors surfaced to the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("No worker for device {0}")]
    NoWorker(DeviceId),

    #[error("Worker for device {0} is not ready")]
    NotReady(DeviceId),

    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl SupervisorError {
    /// Whether the failure means the worker process is gone for good.
    pub fn is_worker_gone(&self) -> bool {
        matches!(
            self,
            SupervisorError::NoWorker(_) | SupervisorError::Rpc(RpcError::WorkerExited)
        )
    }
}

/// How to launch a worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Parse a shell-ish command line on whitespace, e.g.
    /// `"python python_worker.py"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

struct ManagedWorker {
    rpc: Arc<RpcClient>,
    ready: Arc<AtomicBool>,
    /// Per-worker cancellation token (child of the master token).
    cancel: CancellationToken,
}

/// Supervises one worker process per GPU slot.
pub struct WorkerSupervisor {
    workers: RwLock<HashMap<DeviceId, ManagedWorker>>,
    command: WorkerCommand,
    event_tx: broadcast::Sender<WorkerEvent>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

impl WorkerSupervisor {
    /// Spawn a worker for every slot and start readiness probing.
    ///
    /// A slot whose process fails to spawn is logged and skipped; the
    /// server keeps running with the remaining workers.
    pub async fn start(command: WorkerCommand, slots: &[GpuSlot]) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let supervisor = Arc::new(Self {
            workers: RwLock::new(HashMap::new()),
            command,
            event_tx,
            cancel: CancellationToken::new(),
        });

        for slot in slots {
            if let Err(e) = Arc::clone(&supervisor).spawn_worker(slot).await {
                tracing::error!(device = slot.device, error = %e, "Failed to spawn worker");
            }
        }

        supervisor
    }

    /// Subscribe to worker lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Devices with a live worker process, in no particular order.
    pub async fn live_devices(&self) -> Vec<DeviceId> {
        self.workers.read().await.keys().copied().collect()
    }

    /// Whether the worker for `device` has passed its readiness probe.
    pub async fn is_ready(&self, device: DeviceId) -> bool {
        self.workers
            .read()
            .await
            .get(&device)
            .is_some_and(|w| w.ready.load(Ordering::SeqCst))
    }

    /// Dispatch a generation sub-task to the worker for `device`.
    ///
    /// The args vector is validated before anything crosses the process
    /// boundary; returns once the worker has accepted the sub-task.
    pub async fn generate(
        &self,
        device: DeviceId,
        task_id: &str,
        args: Vec<Value>,
    ) -> Result<(), SupervisorError> {
        validate_args(&args)?;

        let rpc = self.rpc_for(device, true).await?;
        let request = GenerateRequest {
            task_id: task_id.to_string(),
            fooocus_args: args,
            fooocus_args_contract_version: ARGS_CONTRACT_VERSION,
        };
        rpc.generate(&request, GENERATE_TIMEOUT).await?;
        tracing::info!(device, task_id, "Sub-task accepted by worker");
        Ok(())
    }

    /// Poll progress for one sub-task.
    pub async fn progress(
        &self,
        device: DeviceId,
        task_id: &str,
    ) -> Result<ProgressReport, SupervisorError> {
        let rpc = self.rpc_for(device, false).await?;
        Ok(rpc.progress(task_id, RPC_TIMEOUT).await?)
    }

    /// Ask the worker for `device` to cancel its running task.
    pub async fn stop(&self, device: DeviceId) -> Result<bool, SupervisorError> {
        let rpc = self.rpc_for(device, false).await?;
        let result = rpc.stop(RPC_TIMEOUT).await?;
        Ok(result.success)
    }

    /// Terminate every worker and clear the table.
    ///
    /// In-flight tasks are not drained: the coordinator observes
    /// "worker exited" on its next poll and finalizes them as errors.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down worker supervisor");
        self.cancel.cancel();

        let mut workers = self.workers.write().await;
        let count = workers.len();
        for (device, worker) in workers.drain() {
            tracing::info!(device, "Stopping worker");
            worker.cancel.cancel();
        }
        tracing::info!(count, "Worker table cleared");
    }

    // ---- private helpers ----

    async fn rpc_for(
        &self,
        device: DeviceId,
        require_ready: bool,
    ) -> Result<Arc<RpcClient>, SupervisorError> {
        let workers = self.workers.read().await;
        let worker = workers
            .get(&device)
            .ok_or(SupervisorError::NoWorker(device))?;
        if require_ready && !worker.ready.load(Ordering::SeqCst) {
            return Err(SupervisorError::NotReady(device));
        }
        Ok(Arc::clone(&worker.rpc))
    }

    async fn spawn_worker(self: Arc<Self>, slot: &GpuSlot) -> std::io::Result<()> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .env("CUDA_VISIBLE_DEVICES", slot.device.to_string())
            .env("WORKER_GPU_ID", slot.device.to_string())
            .env("WORKER_PORT", slot.port.to_string())
            .env("WORKER_RPC_MODE", "stdio")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let device = slot.device;
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let rpc = RpcClient::new(stdout, stdin, device);
        let ready = Arc::new(AtomicBool::new(false));
        let cancel = self.cancel.child_token();

        // Forward worker stderr into the server log.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(device, "[worker stderr] {line}");
            }
        });

        // Exit watcher: owns the child. Kills it on shutdown, removes
        // the record when it exits on its own.
        {
            let supervisor = Arc::clone(&self);
            let watch_cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = watch_cancel.cancelled() => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        tracing::info!(device, "Worker terminated");
                    }
                    status = child.wait() => {
                        match status {
                            Ok(status) => {
                                tracing::error!(device, %status, "Worker process exited");
                            }
                            Err(e) => {
                                tracing::error!(device, error = %e, "Failed to wait on worker");
                            }
                        }
                        supervisor.workers.write().await.remove(&device);
                        let _ = supervisor.event_tx.send(WorkerEvent::Exited { device });
                    }
                }
            });
        }

        // Readiness probe: up to HEALTH_PROBE_ATTEMPTS, 1 s apart.
        {
            let rpc = Arc::clone(&rpc);
            let ready = Arc::clone(&ready);
            let probe_cancel = cancel.clone();
            let event_tx = self.event_tx.clone();
            tokio::spawn(async move {
                for attempt in 1..=HEALTH_PROBE_ATTEMPTS {
                    if probe_cancel.is_cancelled() || rpc.is_closed() {
                        return;
                    }
                    match rpc.health(HEALTH_PROBE_TIMEOUT).await {
                        Ok(health) if health.status == "ok" => {
                            ready.store(true, Ordering::SeqCst);
                            tracing::info!(device, attempt, "Worker ready");
                            let _ = event_tx.send(WorkerEvent::Ready { device });
                            return;
                        }
                        Ok(health) => {
                            tracing::debug!(device, status = %health.status, "Worker not ready yet");
                        }
                        Err(e) => {
                            tracing::debug!(device, attempt, error = %e, "Health probe failed");
                        }
                    }
                    tokio::select! {
                        () = probe_cancel.cancelled() => return,
                        () = tokio::time::sleep(HEALTH_PROBE_COOLDOWN) => {}
                    }
                }
                tracing::error!(
                    device,
                    attempts = HEALTH_PROBE_ATTEMPTS,
                    "Worker never became healthy, marking unusable",
                );
                let _ = event_tx.send(WorkerEvent::Unusable { device });
            });
        }

        tracing::info!(
            device,
            name = %slot.name,
            port = slot.port,
            program = %self.command.program,
            "Spawned worker process",
        );

        self.workers.write().await.insert(
            device,
            ManagedWorker { rpc, ready, cancel },
        );

        Ok(())
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        // Children must not outlive the supervisor even when shutdown()
        // was never awaited.
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
