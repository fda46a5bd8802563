//! Asynchronous job submission: persist, publish, enqueue.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use genflow_core::{DomainError, TenantId};
use genflow_jobs::{Job, JobKind};

use crate::publisher::UpdatePublisher;
use crate::queue::{Lane, QueueError, Task, TaskQueue};
use crate::store::{JobRepository, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("validation error: {0}")]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The job was stored but could not be queued. It stays `pending`.
    #[error("job {job_id} stored but not queued: {source}")]
    Enqueue {
        job_id: genflow_core::JobId,
        #[source]
        source: QueueError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitJob {
    pub kind: JobKind,
    pub input: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub lane: Lane,
}

impl SubmitJob {
    pub fn new(kind: JobKind, input: impl Into<String>) -> Self {
        Self {
            kind,
            input: input.into(),
            provider: None,
            model: None,
            max_tokens: None,
            lane: Lane::Default,
        }
    }

    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_lane(mut self, lane: Lane) -> Self {
        self.lane = lane;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct JobSubmitter {
    jobs: Arc<dyn JobRepository>,
    queue: Arc<dyn TaskQueue>,
    publisher: UpdatePublisher,
    best_effort: bool,
}

impl JobSubmitter {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        queue: Arc<dyn TaskQueue>,
        publisher: UpdatePublisher,
    ) -> Self {
        Self {
            jobs,
            queue,
            publisher,
            best_effort: false,
        }
    }

    /// When set, a failed enqueue still returns the stored job with a warning.
    pub fn best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    #[instrument(
        skip(self, request),
        fields(tenant_id = %tenant_id, kind = request.kind.as_str()),
        err
    )]
    pub async fn submit(
        &self,
        tenant_id: TenantId,
        request: SubmitJob,
    ) -> Result<Submission, SubmitError> {
        let job = Job::new(tenant_id, request.kind, request.input, Utc::now())
            .with_requested_provider(request.provider)
            .with_requested_model(request.model)
            .with_max_tokens(request.max_tokens);
        job.validate()?;

        self.jobs.insert(job.clone())?;
        self.publisher.publish(&job);

        match self.queue.enqueue(Task::execute_job(job.id, request.lane)).await {
            Ok(()) => {
                info!(job_id = %job.id, lane = request.lane.as_str(), "job queued");
                Ok(Submission { job, warning: None })
            }
            Err(source) if self.best_effort => {
                warn!(job_id = %job.id, error = %source, "enqueue failed; job left pending");
                Ok(Submission {
                    job,
                    warning: Some(format!("job stored but not queued: {source}")),
                })
            }
            Err(source) => Err(SubmitError::Enqueue { job_id: job.id, source }),
        }
    }
}
