//! Task queue contract between the submitter and the workers.
//!
//! The queue moves job references, never job state. Delivery is at-least-once;
//! priority lanes, redelivery caps and dead-lettering belong to the broker
//! implementation and its configuration.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_streams;

pub use in_memory::InMemoryTaskQueue;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsTaskQueue;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use genflow_core::JobId;

/// Task kind for "run this job".
pub const EXECUTE_JOB: &str = "job.execute";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Critical,
    #[default]
    Default,
    Low,
}

impl Lane {
    /// Highest priority first.
    pub const ALL: [Lane; 3] = [Lane::Critical, Lane::Default, Lane::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Critical => "critical",
            Lane::Default => "default",
            Lane::Low => "low",
        }
    }

    pub fn parse(raw: &str) -> Option<Lane> {
        Lane::ALL.into_iter().find(|l| l.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub kind: String,
    pub lane: Lane,
    pub payload: JsonValue,
    /// Deliveries so far, starting at 0.
    pub attempt: u32,
}

impl Task {
    pub fn new(kind: impl Into<String>, lane: Lane, payload: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            lane,
            payload,
            attempt: 0,
        }
    }

    pub fn execute_job(job_id: JobId, lane: Lane) -> Self {
        Self::new(EXECUTE_JOB, lane, json!({ "job_id": job_id }))
    }
}

/// Payload of an [`EXECUTE_JOB`] task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteJobPayload {
    pub job_id: JobId,
}

impl ExecuteJobPayload {
    pub fn parse(task: &Task) -> Result<Self, QueueError> {
        if task.kind != EXECUTE_JOB {
            return Err(QueueError::Payload(format!("unknown task kind '{}'", task.kind)));
        }
        serde_json::from_value(task.payload.clone()).map_err(|e| QueueError::Payload(e.to_string()))
    }
}

/// A dequeued task plus the broker's handle for acknowledging it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub receipt: String,
    pub task: Task,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("unknown delivery: {0}")]
    UnknownDelivery(String),
    #[error("invalid task payload: {0}")]
    Payload(String),
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<(), QueueError>;

    /// Next task by lane priority, waiting up to `wait` for one to arrive.
    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Hand the task back for another delivery after a transport-level failure.
    async fn requeue(&self, delivery: Delivery) -> Result<(), QueueError>;
}
