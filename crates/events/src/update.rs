//! Payloads carried by the job and usage hubs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use genflow_core::{JobId, TenantId};
use genflow_jobs::{Job, JobKind, JobStatus};

/// Routing key on the job hub: every update goes to both topics of its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobTopic {
    Tenant(TenantId),
    Job(JobId),
}

impl core::fmt::Display for JobTopic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            JobTopic::Tenant(id) => write!(f, "tenant:{id}"),
            JobTopic::Job(id) => write!(f, "job:{id}"),
        }
    }
}

/// Point-in-time snapshot of a job, as pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub updated_at: DateTime<Utc>,
}

impl JobUpdate {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn topics(&self) -> [JobTopic; 2] {
        [JobTopic::Tenant(self.tenant_id), JobTopic::Job(self.job_id)]
    }
}

impl From<&Job> for JobUpdate {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            tenant_id: job.tenant_id,
            kind: job.kind,
            status: job.status,
            provider: job.provider.clone(),
            model: job.model.clone(),
            result: job.result.clone(),
            error: job.error.clone(),
            tokens_in: job.tokens_in,
            tokens_out: job.tokens_out,
            cost: job.cost,
            updated_at: job.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_with_wire_names() {
        let now = Utc::now();
        let mut job = Job::new(TenantId::new(), JobKind::Text, "hi", now);
        job.start("stub", now).unwrap();

        let update = JobUpdate::from(&job);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["type"], "text");
        assert_eq!(json["provider"], "stub");
        assert_eq!(json["jobId"], serde_json::json!(job.id));
        assert!(json.get("error").is_none());
        assert!(!update.is_terminal());
    }

    #[test]
    fn topics_cover_tenant_and_job() {
        let job = Job::new(TenantId::new(), JobKind::Image, "cat", Utc::now());
        let update = JobUpdate::from(&job);
        assert_eq!(
            update.topics(),
            [JobTopic::Tenant(job.tenant_id), JobTopic::Job(job.id)]
        );
        assert!(update.topics()[0].to_string().starts_with("tenant:"));
    }
}
