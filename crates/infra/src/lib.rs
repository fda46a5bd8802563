//! Infrastructure layer: storage, task queues, job execution, workers and the
//! cross-instance update transport.

pub mod execution;
pub mod publisher;
pub mod queue;
pub mod store;
pub mod submit;
pub mod workers;

#[cfg(feature = "redis")]
pub mod redis_pubsub;

pub use execution::{
    Completion, CompletionRequest, ExecutionError, ExecutionOutcome, ExecutionService,
};
pub use publisher::UpdatePublisher;
pub use submit::{JobSubmitter, SubmitError, SubmitJob, Submission};
