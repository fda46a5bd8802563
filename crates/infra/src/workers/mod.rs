//! Background loops: queue workers and the cross-instance update bridge.

mod bridge;
mod job_worker;

pub use bridge::{BridgeHandle, UpdateBridge};
pub use job_worker::{TaskOutcome, Worker, WorkerConfig, WorkerHandle, WorkerStats};
