use std::sync::Arc;

use remgo_core::scheduler::GpuScheduler;
use remgo_db::MetadataStore;
use remgo_worker::WorkerSupervisor;

use crate::config::ServerConfig;
use crate::engine::TaskCoordinator;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// GPU slot table and weighted scheduler.
    pub scheduler: Arc<GpuScheduler>,
    /// Worker process supervisor.
    pub supervisor: Arc<WorkerSupervisor>,
    /// Per-request task state machines.
    pub coordinator: Arc<TaskCoordinator>,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
    /// Read-side handle over the metadata sidecar.
    pub metadata: Arc<MetadataStore>,
}
