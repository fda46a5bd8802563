//! Job entity and lifecycle state machine.
//!
//! ```text
//! pending ──start(provider)──▶ processing ──complete(outcome)──▶ completed
//!                                   │
//!                                   └──────fail(error)─────────▶ failed
//! ```
//!
//! Transitions are one-way. `started_at` is stamped only by `start`,
//! `finished_at` only by `complete`/`fail`, and `result`/`error` are written
//! exactly once, at the terminal transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use genflow_core::{DomainError, DomainResult, Entity, JobId, TenantId};

/// What kind of generation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Text,
    Image,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Text => "text",
            JobKind::Image => "image",
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Position in the lifecycle; never decreases for a given job.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state transition.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransitionError {
    #[error("cannot move job from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("a provider name is required to start a job")]
    MissingProvider,

    #[error("an error message is required to fail a job")]
    MissingError,

    #[error("cost must be a finite, non-negative amount (got {0})")]
    InvalidCost(f64),
}

impl From<TransitionError> for DomainError {
    fn from(value: TransitionError) -> Self {
        DomainError::invariant(value.to_string())
    }
}

/// Everything recorded on a successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub result: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
}

/// One unit of requested AI work and its tracked outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub tenant_id: TenantId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub input: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job.
    pub fn new(
        tenant_id: TenantId,
        kind: JobKind,
        input: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            tenant_id,
            kind,
            input: input.into(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            provider: None,
            model: None,
            requested_provider: None,
            requested_model: None,
            max_tokens: None,
            tokens_in: 0,
            tokens_out: 0,
            cost: 0.0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_requested_provider(mut self, provider: Option<String>) -> Self {
        self.requested_provider = provider.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_requested_model(mut self, model: Option<String>) -> Self {
        self.requested_model = model.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Validate the fields a submitter controls.
    pub fn validate(&self) -> DomainResult<()> {
        if self.input.trim().is_empty() {
            return Err(DomainError::validation("input must not be empty"));
        }
        if self.max_tokens == Some(0) {
            return Err(DomainError::validation("maxTokens must be greater than zero"));
        }
        Ok(())
    }

    fn guard(&self, to: JobStatus) -> Result<(), TransitionError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    /// `pending → processing`, naming the provider attempting the job.
    pub fn start(
        &mut self,
        provider: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.guard(JobStatus::Processing)?;
        let provider = provider.into();
        if provider.trim().is_empty() {
            return Err(TransitionError::MissingProvider);
        }

        self.status = JobStatus::Processing;
        self.provider = Some(provider);
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `processing → completed`.
    pub fn complete(
        &mut self,
        outcome: JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.guard(JobStatus::Completed)?;
        if !outcome.cost.is_finite() || outcome.cost < 0.0 {
            return Err(TransitionError::InvalidCost(outcome.cost));
        }

        self.status = JobStatus::Completed;
        self.result = Some(outcome.result);
        self.model = Some(outcome.model);
        self.tokens_in = outcome.tokens_in;
        self.tokens_out = outcome.tokens_out;
        self.cost = outcome.cost;
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `processing → failed`.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.guard(JobStatus::Failed)?;
        let error = error.into();
        if error.trim().is_empty() {
            return Err(TransitionError::MissingError);
        }

        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Entity for Job {
    type Id = JobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
