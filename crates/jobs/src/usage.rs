//! Usage records and the derived per-provider summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use genflow_core::{Entity, JobId, TenantId, UsageId};

use crate::job::Job;

/// Token consumption of one terminal job. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub id: UsageId,
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub provider: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
}

impl Usage {
    /// Build the usage record for a job that finished with token consumption.
    ///
    /// Returns `None` for non-terminal jobs and for jobs that consumed nothing.
    pub fn from_job(job: &Job) -> Option<Self> {
        if !job.status.is_terminal() || job.tokens_in + job.tokens_out == 0 {
            return None;
        }
        let provider = job.provider.clone()?;

        Some(Self {
            id: UsageId::new(),
            tenant_id: job.tenant_id,
            job_id: job.id,
            provider,
            model: job.model.clone().unwrap_or_default(),
            tokens_in: job.tokens_in,
            tokens_out: job.tokens_out,
            cost: job.cost,
            created_at: job.finished_at.unwrap_or(job.updated_at),
        })
    }
}

impl Entity for Usage {
    type Id = UsageId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Aggregate usage of one provider within a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub provider: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub job_count: u64,
}

/// Tenant-wide totals across providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub job_count: u64,
}

/// Group usage records by provider, sorted by provider name.
pub fn summarize<'a>(records: impl IntoIterator<Item = &'a Usage>) -> Vec<UsageSummary> {
    let mut by_provider: BTreeMap<&str, UsageSummary> = BTreeMap::new();

    for usage in records {
        let entry = by_provider
            .entry(usage.provider.as_str())
            .or_insert_with(|| UsageSummary {
                provider: usage.provider.clone(),
                tokens_in: 0,
                tokens_out: 0,
                cost: 0.0,
                job_count: 0,
            });
        entry.tokens_in += usage.tokens_in;
        entry.tokens_out += usage.tokens_out;
        entry.cost += usage.cost;
        entry.job_count += 1;
    }

    by_provider.into_values().collect()
}

/// Recomputable usage view for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantUsage {
    pub tenant_id: TenantId,
    pub providers: Vec<UsageSummary>,
    pub totals: UsageTotals,
}

impl TenantUsage {
    pub fn compute<'a>(tenant_id: TenantId, records: impl IntoIterator<Item = &'a Usage>) -> Self {
        let providers = summarize(records.into_iter().filter(|u| u.tenant_id == tenant_id));
        let totals = providers.iter().fold(UsageTotals::default(), |mut acc, s| {
            acc.tokens_in += s.tokens_in;
            acc.tokens_out += s.tokens_out;
            acc.cost += s.cost;
            acc.job_count += s.job_count;
            acc
        });

        Self {
            tenant_id,
            providers,
            totals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobOutcome};

    fn completed_job(tenant: TenantId, provider: &str, tin: u64, tout: u64, cost: f64) -> Job {
        let now = Utc::now();
        let mut job = Job::new(tenant, JobKind::Text, "hi", now);
        job.start(provider, now).unwrap();
        job.complete(
            JobOutcome {
                result: "ok".into(),
                model: format!("{provider}-model"),
                tokens_in: tin,
                tokens_out: tout,
                cost,
            },
            now,
        )
        .unwrap();
        job
    }

    #[test]
    fn usage_only_for_terminal_jobs_with_tokens() {
        let tenant = TenantId::new();
        let pending = Job::new(tenant, JobKind::Text, "hi", Utc::now());
        assert!(Usage::from_job(&pending).is_none());

        let zero = completed_job(tenant, "stub", 0, 0, 0.0);
        assert!(Usage::from_job(&zero).is_none());

        let job = completed_job(tenant, "stub", 10, 20, 0.5);
        let usage = Usage::from_job(&job).unwrap();
        assert_eq!(usage.job_id, job.id);
        assert_eq!(usage.provider, "stub");
        assert_eq!(usage.model, "stub-model");
        assert_eq!(usage.created_at, job.finished_at.unwrap());
    }

    #[test]
    fn summary_groups_and_sorts_by_provider() {
        let tenant = TenantId::new();
        let records: Vec<Usage> = [
            completed_job(tenant, "zeta", 1, 1, 1.0),
            completed_job(tenant, "alpha", 2, 3, 0.5),
            completed_job(tenant, "alpha", 4, 5, 0.25),
        ]
        .iter()
        .filter_map(Usage::from_job)
        .collect();

        let summary = summarize(&records);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].provider, "alpha");
        assert_eq!(summary[0].tokens_in, 6);
        assert_eq!(summary[0].tokens_out, 8);
        assert_eq!(summary[0].job_count, 2);
        assert!((summary[0].cost - 0.75).abs() < 1e-12);
        assert_eq!(summary[1].provider, "zeta");
    }

    #[test]
    fn tenant_usage_ignores_other_tenants() {
        let a = TenantId::new();
        let b = TenantId::new();
        let records: Vec<Usage> = [
            completed_job(a, "stub", 1, 2, 0.1),
            completed_job(b, "stub", 100, 200, 9.0),
        ]
        .iter()
        .filter_map(Usage::from_job)
        .collect();

        let view = TenantUsage::compute(a, &records);
        assert_eq!(view.totals.job_count, 1);
        assert_eq!(view.totals.tokens_in, 1);
        assert_eq!(view.providers.len(), 1);
    }
}
