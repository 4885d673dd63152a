//! Worker process supervision for the remgo backend.
//!
//! One long-lived inference worker process runs per GPU slot. The
//! supervisor owns the child processes and exposes a typed RPC API
//! (`health`, `generate`, `progress`, `stop`) over a line-delimited
//! JSON-RPC 2.0 channel on the worker's stdio.

pub mod events;
pub mod messages;
pub mod rpc;
pub mod supervisor;

pub use events::WorkerEvent;
pub use rpc::{RpcClient, RpcError};
pub use supervisor::{SupervisorError, WorkerCommand, WorkerSupervisor};
