//! The two process-local hubs and the rule that ties them together.

use std::sync::Arc;

use tracing::debug;

use genflow_core::{JobId, TenantId};
use genflow_jobs::TenantUsage;

use crate::hub::{Hub, PublishReport, Subscription};
use crate::update::{JobTopic, JobUpdate};

/// Read side used to recompute a tenant's usage after a terminal update.
pub trait UsageSource: Send + Sync {
    fn tenant_usage(&self, tenant_id: TenantId) -> Option<TenantUsage>;
}

impl<S> UsageSource for Arc<S>
where
    S: UsageSource + ?Sized,
{
    fn tenant_usage(&self, tenant_id: TenantId) -> Option<TenantUsage> {
        (**self).tenant_usage(tenant_id)
    }
}

/// What one `publish_job_update` call reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub tenant: PublishReport,
    pub job: PublishReport,
    pub usage: Option<PublishReport>,
}

#[derive(Clone)]
pub struct FanOut {
    jobs: Hub<JobTopic, JobUpdate>,
    usage: Hub<TenantId, TenantUsage>,
    source: Arc<dyn UsageSource>,
}

impl core::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FanOut")
            .field("jobs", &self.jobs)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

impl FanOut {
    pub fn new(buffer: usize, source: Arc<dyn UsageSource>) -> Self {
        Self {
            jobs: Hub::new("jobs", buffer),
            usage: Hub::new("usage", buffer),
            source,
        }
    }

    pub fn jobs(&self) -> &Hub<JobTopic, JobUpdate> {
        &self.jobs
    }

    pub fn usage(&self) -> &Hub<TenantId, TenantUsage> {
        &self.usage
    }

    pub fn subscribe_tenant(&self, tenant_id: TenantId) -> Subscription<JobTopic, JobUpdate> {
        self.jobs.subscribe(JobTopic::Tenant(tenant_id))
    }

    pub fn subscribe_job(&self, job_id: JobId) -> Subscription<JobTopic, JobUpdate> {
        self.jobs.subscribe(JobTopic::Job(job_id))
    }

    pub fn subscribe_usage(&self, tenant_id: TenantId) -> Subscription<TenantId, TenantUsage> {
        self.usage.subscribe(tenant_id)
    }

    /// Deliver `update` to its tenant and job topics. On a terminal status the
    /// tenant's usage is recomputed and pushed, but only while someone is
    /// listening on the usage hub.
    pub fn publish_job_update(&self, update: JobUpdate) -> FanOutReport {
        let [tenant_topic, job_topic] = update.topics();
        let tenant_id = update.tenant_id;
        let terminal = update.is_terminal();

        let tenant = self.jobs.publish(&tenant_topic, update.clone());
        let job = self.jobs.publish(&job_topic, update);

        let usage = if terminal && self.usage.subscriber_count(&tenant_id) > 0 {
            self.source
                .tenant_usage(tenant_id)
                .map(|snapshot| self.usage.publish(&tenant_id, snapshot))
        } else {
            None
        };

        debug!(
            tenant_id = %tenant_id,
            tenant_delivered = tenant.delivered,
            job_delivered = job.delivered,
            usage_pushed = usage.is_some(),
            "job update fanned out"
        );

        FanOutReport { tenant, job, usage }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use genflow_jobs::{Job, JobKind, JobOutcome, Usage};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorded {
        usage: Mutex<Vec<Usage>>,
        calls: AtomicUsize,
    }

    impl UsageSource for Recorded {
        fn tenant_usage(&self, tenant_id: TenantId) -> Option<TenantUsage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let usage = self.usage.lock().unwrap();
            Some(TenantUsage::compute(tenant_id, usage.iter()))
        }
    }

    fn completed(tenant: TenantId) -> Job {
        let now = Utc::now();
        let mut job = Job::new(tenant, JobKind::Text, "hello", now);
        job.start("stub", now).unwrap();
        job.complete(
            JobOutcome {
                result: "ok".into(),
                model: "stub-1".into(),
                tokens_in: 3,
                tokens_out: 4,
                cost: 0.5,
            },
            now,
        )
        .unwrap();
        job
    }

    #[tokio::test]
    async fn update_reaches_tenant_and_job_subscribers_only_for_that_tenant() {
        let source = Arc::new(Recorded::default());
        let fanout = FanOut::new(8, source);
        let a = TenantId::new();
        let b = TenantId::new();

        let job = Job::new(a, JobKind::Text, "hi", Utc::now());
        let mut tenant_a = fanout.subscribe_tenant(a);
        let mut tenant_b = fanout.subscribe_tenant(b);
        let mut by_job = fanout.subscribe_job(job.id);

        let report = fanout.publish_job_update(JobUpdate::from(&job));
        assert_eq!(report.tenant.delivered, 1);
        assert_eq!(report.job.delivered, 1);
        assert_eq!(report.usage, None);

        assert_eq!(tenant_a.recv().await.unwrap().job_id, job.id);
        assert_eq!(by_job.recv().await.unwrap().job_id, job.id);
        assert!(tenant_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn terminal_update_refreshes_usage_only_with_listeners() {
        let source = Arc::new(Recorded::default());
        let fanout = FanOut::new(8, source.clone());
        let tenant = TenantId::new();
        let job = completed(tenant);
        source
            .usage
            .lock()
            .unwrap()
            .push(Usage::from_job(&job).unwrap());

        fanout.publish_job_update(JobUpdate::from(&job));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        let mut usage = fanout.subscribe_usage(tenant);
        let report = fanout.publish_job_update(JobUpdate::from(&job));
        assert_eq!(report.usage.map(|r| r.delivered), Some(1));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let snapshot = usage.recv().await.unwrap();
        assert_eq!(snapshot.totals.job_count, 1);
        assert_eq!(snapshot.totals.tokens_out, 4);
    }

    #[tokio::test]
    async fn non_terminal_update_never_touches_usage() {
        let source = Arc::new(Recorded::default());
        let fanout = FanOut::new(8, source.clone());
        let tenant = TenantId::new();
        let _usage = fanout.subscribe_usage(tenant);

        let job = Job::new(tenant, JobKind::Text, "hi", Utc::now());
        let report = fanout.publish_job_update(JobUpdate::from(&job));
        assert_eq!(report.usage, None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
