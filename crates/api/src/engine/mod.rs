//! Task orchestration engine: the per-request state machine and the
//! progress frames it publishes to WebSocket subscribers.

pub mod coordinator;
pub mod progress;

pub use coordinator::{SubmitOutcome, TaskCoordinator, TaskStatus};
pub use progress::ProgressUpdate;
