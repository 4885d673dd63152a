//! Platform-level worker lifecycle events.
//!
//! Broadcast by [`crate::WorkerSupervisor`]; subscribe to react to
//! readiness changes (e.g. parking the slot of a worker that never
//! became healthy).

use remgo_core::types::DeviceId;

/// One worker lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The readiness probe succeeded.
    Ready { device: DeviceId },
    /// The readiness probe exhausted its budget; the worker stays in
    /// the table but will refuse `generate` calls.
    Unusable { device: DeviceId },
    /// The worker process exited; its record has been removed.
    Exited { device: DeviceId },
}
