//! Job execution service: the only code that calls providers and moves jobs
//! out of `pending`.
//!
//! Every path (queued, synchronous, streaming) follows the same sequence:
//! resolve a provider, start the job against it, call the provider, then
//! complete or fail the job, record usage, and publish each transition.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use genflow_core::{DomainError, JobId, TenantId};
use genflow_jobs::{Job, JobKind, JobOutcome, JobStatus, TenantUsage, TransitionError, Usage};
use genflow_providers::{
    ChatMessage, ChunkSink, FinishReason, Generation, GenerationRequest, Pricing, Provider,
    ProviderError, ProviderRegistry, Selection, ToolCall, ToolChoice, ToolDefinition,
};

use crate::publisher::UpdatePublisher;
use crate::store::{JobRepository, StoreError, TenantRepository, UsageRepository};

/// Provider name recorded on a job when no provider name could be resolved.
pub const UNRESOLVED_PROVIDER: &str = "unresolved";

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<DomainError> for ExecutionError {
    fn from(value: DomainError) -> Self {
        ExecutionError::Validation(value.to_string())
    }
}

/// What happened to a queued job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(Job),
    /// The provider failed; the job is now `failed`.
    Failed(Job),
    /// Another delivery already owns the job.
    Skipped,
    AlreadyTerminal(JobStatus),
}

/// Input to the synchronous and streaming paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub kind: Option<JobKind>,
    pub prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
}

impl CompletionRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>, choice: ToolChoice) -> Self {
        self.tools = tools;
        self.tool_choice = choice;
        self
    }

    fn generation_request(&self) -> GenerationRequest {
        GenerationRequest::text(self.prompt.clone().unwrap_or_default())
            .with_kind(self.kind.unwrap_or(JobKind::Text))
            .with_messages(self.messages.clone())
            .with_model(self.model.clone())
            .with_max_tokens(self.max_tokens)
    }

    fn validate(&self) -> Result<(), ExecutionError> {
        let has_prompt = self.prompt.as_deref().is_some_and(|p| !p.trim().is_empty());
        if !has_prompt && self.messages.is_empty() {
            return Err(ExecutionError::Validation("prompt or messages is required".into()));
        }
        if self.max_tokens == Some(0) {
            return Err(ExecutionError::Validation("maxTokens must be positive".into()));
        }
        Ok(())
    }
}

/// Result of a synchronous or streamed completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub job_id: JobId,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub provider: String,
    pub model: String,
}

pub struct ExecutionService {
    jobs: Arc<dyn JobRepository>,
    usage: Arc<dyn UsageRepository>,
    tenants: Arc<dyn TenantRepository>,
    registry: Arc<ProviderRegistry>,
    pricing: Arc<dyn Pricing>,
    publisher: UpdatePublisher,
    default_provider: Option<String>,
}

impl ExecutionService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        usage: Arc<dyn UsageRepository>,
        tenants: Arc<dyn TenantRepository>,
        registry: Arc<ProviderRegistry>,
        pricing: Arc<dyn Pricing>,
        publisher: UpdatePublisher,
    ) -> Self {
        Self {
            jobs,
            usage,
            tenants,
            registry,
            pricing,
            publisher,
            default_provider: None,
        }
    }

    /// Global default provider, used when neither the request nor the tenant names one.
    pub fn with_default_provider(mut self, provider: Option<String>) -> Self {
        self.default_provider = provider.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn publisher(&self) -> &UpdatePublisher {
        &self.publisher
    }

    fn tenant_default(&self, tenant_id: TenantId) -> Option<String> {
        self.tenants
            .get(tenant_id)
            .ok()
            .and_then(|t| t.default_provider)
    }

    /// Run one queued job. `default_provider` overrides the service-wide
    /// default for this call.
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub async fn execute_job(
        &self,
        job_id: JobId,
        default_provider: Option<&str>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let job = self
            .jobs
            .find(job_id)?
            .ok_or(ExecutionError::JobNotFound(job_id))?;

        match job.status {
            JobStatus::Completed | JobStatus::Failed => {
                debug!(status = %job.status, "job already terminal; nothing to do");
                // Usage insert is idempotent; this repairs a settle that stopped short.
                self.record_usage(&job)?;
                return Ok(ExecutionOutcome::AlreadyTerminal(job.status));
            }
            JobStatus::Processing => {
                debug!("job already processing; skipping redelivery");
                return Ok(ExecutionOutcome::Skipped);
            }
            JobStatus::Pending => {}
        }

        let selection = Selection::default()
            .requested(job.requested_provider.clone())
            .tenant_default(self.tenant_default(job.tenant_id))
            .global_default(
                default_provider
                    .map(str::to_string)
                    .or_else(|| self.default_provider.clone()),
            );

        let provider = match self.registry.select(&selection) {
            Ok(provider) => provider,
            Err(e) => {
                let name = selection
                    .resolved_name()
                    .unwrap_or(UNRESOLVED_PROVIDER)
                    .to_string();
                let Some(job) = self.begin(job, &name)? else {
                    return Ok(ExecutionOutcome::Skipped);
                };
                return self.fail(job, &e).map(ExecutionOutcome::Failed);
            }
        };

        let Some(job) = self.begin(job, provider.name())? else {
            return Ok(ExecutionOutcome::Skipped);
        };

        if !provider.is_available().await {
            let e = ProviderError::Unavailable(provider.name().to_string());
            return self.fail(job, &e).map(ExecutionOutcome::Failed);
        }

        let request = GenerationRequest::text(job.input.clone())
            .with_kind(job.kind)
            .with_model(job.requested_model.clone())
            .with_max_tokens(job.max_tokens);

        match provider.execute(&request).await {
            Ok(generation) => self
                .finish(job, provider.name(), &generation)
                .map(ExecutionOutcome::Completed),
            Err(e) => self.fail(job, &e).map(ExecutionOutcome::Failed),
        }
    }

    /// Synchronous completion, optionally with tool calling.
    #[instrument(
        skip(self, request),
        fields(tenant_id = %tenant_id, tools = request.tools.len()),
        err
    )]
    pub async fn complete(
        &self,
        tenant_id: TenantId,
        request: CompletionRequest,
    ) -> Result<Completion, ExecutionError> {
        request.validate()?;
        let wants_tools = !request.tools.is_empty();
        let provider = self.resolve(tenant_id, &request, wants_tools).await?;
        let tools = if wants_tools {
            Some(provider.require_tools()?)
        } else {
            None
        };

        let generation_request = request.generation_request();
        let job = self.open(tenant_id, &request, &generation_request, provider.name())?;

        let result = match tools {
            Some(tools) => {
                tools
                    .complete_with_tools(&generation_request, &request.tools, &request.tool_choice)
                    .await
            }
            None => provider.execute(&generation_request).await,
        };

        self.settle(job, provider.name(), result)
    }

    /// Streamed completion. Chunks reach `sink` as the provider produces them;
    /// the job is settled after the provider returns, whether or not anyone is
    /// still reading the sink.
    #[instrument(skip(self, request, sink), fields(tenant_id = %tenant_id), err)]
    pub async fn stream(
        &self,
        tenant_id: TenantId,
        request: CompletionRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<Completion, ExecutionError> {
        request.validate()?;
        let provider = self.resolve(tenant_id, &request, false).await?;
        let streaming = provider.require_streaming()?;

        let generation_request = request.generation_request();
        let job = self.open(tenant_id, &request, &generation_request, provider.name())?;

        let result = streaming.stream(&generation_request, sink).await;
        self.settle(job, provider.name(), result)
    }

    pub fn usage_summary(&self, tenant_id: TenantId) -> Result<TenantUsage, ExecutionError> {
        let records = self.usage.list_for_tenant(tenant_id)?;
        Ok(TenantUsage::compute(tenant_id, records.iter()))
    }

    async fn resolve(
        &self,
        tenant_id: TenantId,
        request: &CompletionRequest,
        wants_tools: bool,
    ) -> Result<Arc<dyn Provider>, ExecutionError> {
        let selection = Selection::default()
            .requested(request.provider.clone())
            .tenant_default(self.tenant_default(tenant_id))
            .global_default(self.default_provider.clone())
            .with_tools(wants_tools);
        let provider = self.registry.select(&selection)?;

        if !provider.is_available().await {
            return Err(ProviderError::Unavailable(provider.name().to_string()).into());
        }
        Ok(provider)
    }

    /// Create the job record for a synchronous call and start it immediately.
    fn open(
        &self,
        tenant_id: TenantId,
        request: &CompletionRequest,
        generation_request: &GenerationRequest,
        provider: &str,
    ) -> Result<Job, ExecutionError> {
        let job = Job::new(
            tenant_id,
            generation_request.kind,
            generation_request.effective_prompt(),
            Utc::now(),
        )
        .with_requested_provider(request.provider.clone())
        .with_requested_model(request.model.clone())
        .with_max_tokens(request.max_tokens);
        job.validate()?;

        self.jobs.insert(job.clone())?;
        self.publisher.publish(&job);

        self.begin(job, provider)?
            .ok_or_else(|| StoreError::Conflict("job was started concurrently".into()).into())
    }

    fn settle(
        &self,
        job: Job,
        provider: &str,
        result: Result<Generation, ProviderError>,
    ) -> Result<Completion, ExecutionError> {
        match result {
            Ok(generation) => {
                let job = self.finish(job, provider, &generation)?;
                Ok(Completion {
                    job_id: job.id,
                    content: generation.content,
                    tool_calls: generation.tool_calls,
                    finish_reason: generation.finish_reason,
                    tokens_in: job.tokens_in,
                    tokens_out: job.tokens_out,
                    cost: job.cost,
                    provider: provider.to_string(),
                    model: generation.model,
                })
            }
            Err(e) => {
                self.fail(job, &e)?;
                Err(e.into())
            }
        }
    }

    /// `pending -> processing`. `None` if another caller won the transition.
    fn begin(&self, mut job: Job, provider: &str) -> Result<Option<Job>, ExecutionError> {
        job.start(provider, Utc::now())?;
        match self.jobs.transition(&job, JobStatus::Pending) {
            Ok(()) => {}
            Err(StoreError::Conflict(reason)) => {
                debug!(job_id = %job.id, reason = %reason, "lost race to start job");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        info!(job_id = %job.id, tenant_id = %job.tenant_id, provider = %provider, "job processing");
        self.publisher.publish(&job);
        Ok(Some(job))
    }

    /// `processing -> completed`. If the outcome cannot be stored as completed
    /// the job is failed instead, so it never stays `processing`.
    fn finish(
        &self,
        job: Job,
        provider: &str,
        generation: &Generation,
    ) -> Result<Job, ExecutionError> {
        let processing = job.clone();
        let job = match self.store_completion(job, provider, generation) {
            Ok(job) => job,
            Err(e) => {
                warn!(
                    job_id = %processing.id,
                    error = %e,
                    "could not settle completed job; failing it"
                );
                self.fail(processing, format!("settlement failed: {e}"))?;
                return Err(e);
            }
        };
        self.record_usage(&job)?;

        info!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            provider = %provider,
            tokens_in = job.tokens_in,
            tokens_out = job.tokens_out,
            cost = job.cost,
            "job completed"
        );
        self.publisher.publish(&job);
        Ok(job)
    }

    fn store_completion(
        &self,
        mut job: Job,
        provider: &str,
        generation: &Generation,
    ) -> Result<Job, ExecutionError> {
        let cost = match self.pricing.price_for(provider, &generation.model) {
            Some(quote) => quote.cost_for(job.kind, generation.tokens_in, generation.tokens_out),
            None => {
                debug!(
                    provider = %provider,
                    model = %generation.model,
                    "no price configured; cost is zero"
                );
                0.0
            }
        };

        let result = if generation.tool_calls.is_empty() {
            generation.content.clone()
        } else {
            serde_json::to_string(&generation.tool_calls)
                .map_err(|e| ExecutionError::Validation(format!("unserializable tool calls: {e}")))?
        };

        job.complete(
            JobOutcome {
                result,
                model: generation.model.clone(),
                tokens_in: generation.tokens_in,
                tokens_out: generation.tokens_out,
                cost,
            },
            Utc::now(),
        )?;
        self.jobs.transition(&job, JobStatus::Processing)?;
        Ok(job)
    }

    fn fail(&self, mut job: Job, reason: impl std::fmt::Display) -> Result<Job, ExecutionError> {
        job.fail(reason.to_string(), Utc::now())?;
        self.jobs.transition(&job, JobStatus::Processing)?;
        self.record_usage(&job)?;

        warn!(job_id = %job.id, tenant_id = %job.tenant_id, error = %reason, "job failed");
        self.publisher.publish(&job);
        Ok(job)
    }

    fn record_usage(&self, job: &Job) -> Result<(), ExecutionError> {
        let Some(usage) = Usage::from_job(job) else {
            return Ok(());
        };
        match self.usage.insert(usage) {
            Ok(()) => Ok(()),
            Err(StoreError::AlreadyExists { .. }) => {
                debug!(job_id = %job.id, "usage already recorded");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        InMemoryJobRepository, InMemoryTenantRepository, InMemoryUsageRepository, Page, PageResult,
        RepositoryUsageSource,
    };
    use genflow_auth::Tenant;
    use genflow_events::{FanOut, InstanceId};
    use genflow_providers::{EchoProvider, PriceQuote, PriceTable, StubProvider};
    use serde_json::json;

    struct Fixture {
        service: ExecutionService,
        jobs: Arc<dyn JobRepository>,
        usage: Arc<InMemoryUsageRepository>,
        tenants: Arc<InMemoryTenantRepository>,
        fanout: FanOut,
        tenant: TenantId,
    }

    fn fixture() -> Fixture {
        fixture_with(
            Arc::new(InMemoryJobRepository::new()),
            PriceTable::new()
                .with_provider_default("stub", PriceQuote::per_million(1_000.0, 2_000.0)),
        )
    }

    fn fixture_with(jobs: Arc<dyn JobRepository>, pricing: PriceTable) -> Fixture {
        let usage = Arc::new(InMemoryUsageRepository::new());
        let tenants = Arc::new(InMemoryTenantRepository::new());
        let registry = ProviderRegistry::new()
            .with(Arc::new(StubProvider::new()))
            .with(Arc::new(EchoProvider::new()))
            .with(Arc::new(StubProvider::new().named("flaky").failing("rate limited")))
            .with(Arc::new(StubProvider::new().named("down").unavailable()));
        let fanout = FanOut::new(16, Arc::new(RepositoryUsageSource::new(usage.clone())));
        let publisher = UpdatePublisher::new(fanout.clone(), InstanceId::new());

        let tenant = Tenant::new("acme", Utc::now());
        tenants.insert(tenant.clone()).unwrap();

        let service = ExecutionService::new(
            jobs.clone(),
            usage.clone(),
            tenants.clone(),
            Arc::new(registry),
            Arc::new(pricing),
            publisher,
        )
        .with_default_provider(Some("stub".into()));

        Fixture {
            service,
            jobs,
            usage,
            tenants,
            fanout,
            tenant: tenant.id,
        }
    }

    fn queued(f: &Fixture, input: &str, provider: Option<&str>) -> Job {
        let job = Job::new(f.tenant, JobKind::Text, input, Utc::now())
            .with_requested_provider(provider.map(str::to_string));
        f.jobs.insert(job.clone()).unwrap();
        job
    }

    #[tokio::test]
    async fn queued_job_runs_to_completion_and_publishes_each_step() {
        let f = fixture();
        let job = queued(&f, "Hello there", None);
        let mut updates = f.fanout.subscribe_job(job.id);

        let outcome = f.service.execute_job(job.id, None).await.unwrap();
        let ExecutionOutcome::Completed(done) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.provider.as_deref(), Some("stub"));
        assert!(done.started_at.is_some() && done.finished_at.is_some());
        let expected =
            done.tokens_in as f64 * 1_000.0 / 1e6 + done.tokens_out as f64 * 2_000.0 / 1e6;
        assert!((done.cost - expected).abs() < 1e-12);

        assert_eq!(updates.recv().await.unwrap().status, JobStatus::Processing);
        assert_eq!(updates.recv().await.unwrap().status, JobStatus::Completed);
        assert_eq!(f.usage.list_for_tenant(f.tenant).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn redelivery_of_finished_or_running_job_is_a_no_op() {
        let f = fixture();
        let job = queued(&f, "Hello", None);
        f.service.execute_job(job.id, None).await.unwrap();

        let again = f.service.execute_job(job.id, None).await.unwrap();
        assert_eq!(again, ExecutionOutcome::AlreadyTerminal(JobStatus::Completed));
        assert_eq!(f.usage.list_for_tenant(f.tenant).unwrap().len(), 1);

        let mut running = queued(&f, "Hi", None);
        running.start("stub", Utc::now()).unwrap();
        f.jobs.transition(&running, JobStatus::Pending).unwrap();
        assert_eq!(
            f.service.execute_job(running.id, None).await.unwrap(),
            ExecutionOutcome::Skipped
        );
    }

    /// Job store that cannot persist the `completed` transition.
    struct RefusesCompletion(InMemoryJobRepository);

    impl JobRepository for RefusesCompletion {
        fn insert(&self, job: Job) -> Result<(), StoreError> {
            self.0.insert(job)
        }

        fn get(&self, tenant_id: TenantId, id: JobId) -> Result<Job, StoreError> {
            self.0.get(tenant_id, id)
        }

        fn find(&self, id: JobId) -> Result<Option<Job>, StoreError> {
            self.0.find(id)
        }

        fn transition(&self, job: &Job, from: JobStatus) -> Result<(), StoreError> {
            if job.status == JobStatus::Completed {
                return Err(StoreError::Storage("disk full".into()));
            }
            self.0.transition(job, from)
        }

        fn list(&self, tenant_id: TenantId, page: Page) -> Result<PageResult<Job>, StoreError> {
            self.0.list(tenant_id, page)
        }
    }

    #[tokio::test]
    async fn rejected_cost_fails_the_job_instead_of_leaving_it_processing() {
        let f = fixture_with(
            Arc::new(InMemoryJobRepository::new()),
            PriceTable::new().with_provider_default("stub", PriceQuote::per_million(-1.0, -1.0)),
        );
        let job = queued(&f, "Hello there", None);
        let mut updates = f.fanout.subscribe_job(job.id);

        let err = f.service.execute_job(job.id, None).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Transition(TransitionError::InvalidCost(_))));

        let stored = f.jobs.get(f.tenant, job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().starts_with("settlement failed"));
        assert!(stored.finished_at.is_some());

        assert_eq!(updates.recv().await.unwrap().status, JobStatus::Processing);
        assert_eq!(updates.recv().await.unwrap().status, JobStatus::Failed);

        assert_eq!(
            f.service.execute_job(job.id, None).await.unwrap(),
            ExecutionOutcome::AlreadyTerminal(JobStatus::Failed)
        );
        assert!(f.usage.list_for_tenant(f.tenant).unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_error_while_completing_fails_the_job() {
        let f = fixture_with(
            Arc::new(RefusesCompletion(InMemoryJobRepository::new())),
            PriceTable::new().with_provider_default("stub", PriceQuote::per_million(1.0, 1.0)),
        );
        let job = queued(&f, "Hello there", None);
        let mut updates = f.fanout.subscribe_tenant(f.tenant);

        let err = f.service.execute_job(job.id, None).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Store(StoreError::Storage(_))));

        let stored = f.jobs.get(f.tenant, job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().contains("disk full"));

        assert_eq!(updates.recv().await.unwrap().status, JobStatus::Processing);
        assert_eq!(updates.recv().await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn synchronous_settlement_failure_leaves_a_failed_job() {
        let f = fixture_with(
            Arc::new(InMemoryJobRepository::new()),
            PriceTable::new().with_provider_default("stub", PriceQuote::per_million(f64::NAN, 1.0)),
        );
        let err = f
            .service
            .complete(f.tenant, CompletionRequest::prompt("Hello!"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Transition(TransitionError::InvalidCost(_))));

        let jobs = f.jobs.list(f.tenant, Default::default()).unwrap();
        assert_eq!(jobs.items[0].status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_job_is_reported_without_side_effects() {
        let f = fixture();
        let err = f.service.execute_job(JobId::new(), None).await.unwrap_err();
        assert!(matches!(err, ExecutionError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn provider_error_fails_the_job_but_not_the_call() {
        let f = fixture();
        let job = queued(&f, "Hello", Some("flaky"));

        let outcome = f.service.execute_job(job.id, None).await.unwrap();

        let ExecutionOutcome::Failed(failed) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failed.error.as_deref(), Some("flaky: rate limited"));
        assert!(failed.result.is_none());
        assert!(failed.started_at.is_some());
        assert!(f.usage.list_for_tenant(f.tenant).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_provider_fails_against_the_requested_name() {
        let f = fixture();
        let job = queued(&f, "Hello", Some("nope"));
        let outcome = f.service.execute_job(job.id, None).await.unwrap();
        let ExecutionOutcome::Failed(failed) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failed.provider.as_deref(), Some("nope"));
        assert!(failed.error.unwrap().contains("not registered"));

        let job = queued(&f, "Hello", Some("down"));
        let outcome = f.service.execute_job(job.id, None).await.unwrap();
        let ExecutionOutcome::Failed(failed) = outcome else {
            panic!("expected failure");
        };
        assert!(failed.error.unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn tenant_default_beats_caller_default() {
        let f = fixture();
        let tenant = Tenant::new("echoes", Utc::now()).with_default_provider(Some("echo".into()));
        f.tenants.insert(tenant.clone()).unwrap();

        let job = Job::new(tenant.id, JobKind::Text, "same words", Utc::now());
        f.jobs.insert(job.clone()).unwrap();
        let outcome = f.service.execute_job(job.id, Some("stub")).await.unwrap();
        let ExecutionOutcome::Completed(done) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(done.provider.as_deref(), Some("echo"));
        assert_eq!(done.result.as_deref(), Some("same words"));
        assert_eq!(done.cost, 0.0);
    }

    #[tokio::test]
    async fn synchronous_completion_reports_totals_and_records_a_job() {
        let f = fixture();
        let out = f
            .service
            .complete(f.tenant, CompletionRequest::prompt("Hello!").with_provider("stub"))
            .await
            .unwrap();

        assert_eq!(out.finish_reason, FinishReason::Stop);
        assert!(out.tokens_in > 0 && out.tokens_out > 0);
        assert_eq!(out.provider, "stub");

        let job = f.jobs.get(f.tenant, out.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some(out.content.as_str()));
        assert_eq!(f.service.usage_summary(f.tenant).unwrap().totals.job_count, 1);
    }

    #[tokio::test]
    async fn tool_calls_require_a_capable_provider() {
        let f = fixture();
        let tools = vec![ToolDefinition {
            name: "lookup".into(),
            description: None,
            parameters: json!({}),
        }];

        let err = f
            .service
            .complete(
                f.tenant,
                CompletionRequest::prompt("hi")
                    .with_provider("echo")
                    .with_tools(tools.clone(), ToolChoice::Required),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Provider(ProviderError::CapabilityNotSupported { .. })
        ));
        assert_eq!(f.jobs.list(f.tenant, Default::default()).unwrap().total, 0);

        let out = f
            .service
            .complete(
                f.tenant,
                CompletionRequest::prompt("hi").with_tools(tools, ToolChoice::Required),
            )
            .await
            .unwrap();
        assert_eq!(out.finish_reason, FinishReason::ToolCalls);
        assert_eq!(out.tool_calls[0].name, "lookup");
    }

    #[tokio::test]
    async fn synchronous_provider_error_is_returned_and_recorded() {
        let f = fixture();
        let err = f
            .service
            .complete(f.tenant, CompletionRequest::prompt("hi").with_provider("flaky"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Provider(ProviderError::Upstream { .. })));

        let jobs = f.jobs.list(f.tenant, Default::default()).unwrap();
        assert_eq!(jobs.items[0].status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_any_provider_call() {
        let f = fixture();
        let err = f
            .service
            .complete(f.tenant, CompletionRequest::prompt("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)));
        assert_eq!(f.jobs.list(f.tenant, Default::default()).unwrap().total, 0);
    }

    #[tokio::test]
    async fn streamed_chunks_concatenate_to_the_completion() {
        let f = fixture();
        let mut chunks = Vec::new();
        let mut sink = |c: &str| chunks.push(c.to_string());

        let out = f
            .service
            .stream(f.tenant, CompletionRequest::prompt("tell me a story"), &mut sink)
            .await
            .unwrap();

        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), out.content);
        assert_eq!(f.usage.list_for_tenant(f.tenant).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn streaming_needs_a_streaming_provider() {
        let f = fixture();
        let mut sink = |_: &str| {};
        let err = f
            .service
            .stream(f.tenant, CompletionRequest::prompt("hi").with_provider("echo"), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Provider(ProviderError::CapabilityNotSupported { .. })
        ));
    }
}
