//! Service wiring: repositories, providers, queue, hubs and the broadcaster.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use genflow_auth::{AuthResolver, KeyHasher, Tenant, generate_api_key};
use genflow_events::{FanOut, InstanceId, UpdateBroadcaster};
use genflow_infra::queue::{InMemoryTaskQueue, TaskQueue};
use genflow_infra::store::{
    ApiKeyRepository, ApiUserRepository, AuditLogRepository, InMemoryApiKeyRepository,
    InMemoryApiUserRepository, InMemoryAuditLogRepository, InMemoryJobRepository,
    InMemoryTenantRepository, InMemoryUsageRepository, JobRepository, RepositoryCredentials,
    RepositoryUsageSource, TenantRepository, UsageRepository,
};
use genflow_infra::workers::{BridgeHandle, UpdateBridge, Worker, WorkerConfig, WorkerHandle};
use genflow_infra::{ExecutionService, JobSubmitter, UpdatePublisher};
use genflow_providers::{EchoProvider, PriceQuote, PriceTable, ProviderRegistry, StubProvider};

use crate::config::AppConfig;

pub type Resolver = AuthResolver<RepositoryCredentials, RepositoryCredentials>;

pub struct AppServices {
    pub resolver: Resolver,
    pub tenants: Arc<dyn TenantRepository>,
    pub users: Arc<dyn ApiUserRepository>,
    pub keys: Arc<dyn ApiKeyRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub usage: Arc<dyn UsageRepository>,
    pub registry: Arc<ProviderRegistry>,
    pub queue: Arc<dyn TaskQueue>,
    pub fanout: FanOut,
    pub broadcaster: Option<Arc<dyn UpdateBroadcaster>>,
    pub instance: InstanceId,
    pub execution: Arc<ExecutionService>,
    pub submitter: JobSubmitter,
}

/// Providers compiled into this build.
pub fn default_registry() -> ProviderRegistry {
    ProviderRegistry::new()
        .with(Arc::new(StubProvider::new()))
        .with(Arc::new(EchoProvider::new()))
}

pub fn default_pricing() -> PriceTable {
    PriceTable::new()
        .with_provider_default("stub", PriceQuote::per_million(0.5, 1.5).with_image_price(0.02))
        .with_model_price(
            "stub",
            "stub-large",
            PriceQuote::per_million(3.0, 15.0).with_image_price(0.04),
        )
        .with_provider_default("echo", PriceQuote::free())
}

type Transports = (Arc<dyn TaskQueue>, Option<Arc<dyn UpdateBroadcaster>>);

#[cfg(feature = "redis")]
fn transports(config: &AppConfig, instance: InstanceId) -> anyhow::Result<Transports> {
    use genflow_infra::queue::RedisStreamsTaskQueue;
    use genflow_infra::redis_pubsub::{DEFAULT_CHANNEL, RedisPubSubBroadcaster};

    let Some(url) = config.redis_url.as_deref() else {
        return Ok(in_memory_transports(config));
    };

    let queue = RedisStreamsTaskQueue::new(url, format!("genflow-{instance}"))?
        .with_max_deliveries(config.queue_max_deliveries);
    queue.ensure_groups()?;
    let broadcaster = RedisPubSubBroadcaster::new(url, DEFAULT_CHANNEL)?;
    info!("using redis streams queue and redis pub/sub broadcaster");
    Ok((Arc::new(queue), Some(Arc::new(broadcaster))))
}

#[cfg(not(feature = "redis"))]
fn transports(config: &AppConfig, _instance: InstanceId) -> anyhow::Result<Transports> {
    if config.redis_url.is_some() {
        anyhow::bail!("GENFLOW_USE_REDIS requires a build with the `redis` feature");
    }
    Ok(in_memory_transports(config))
}

fn in_memory_transports(config: &AppConfig) -> Transports {
    let queue = InMemoryTaskQueue::new().with_max_deliveries(config.queue_max_deliveries);
    (Arc::new(queue), None)
}

impl AppServices {
    pub fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let tenants: Arc<dyn TenantRepository> = Arc::new(InMemoryTenantRepository::new());
        let users: Arc<dyn ApiUserRepository> = Arc::new(InMemoryApiUserRepository::new());
        let keys: Arc<dyn ApiKeyRepository> = Arc::new(InMemoryApiKeyRepository::new());
        let audit: Arc<dyn AuditLogRepository> = Arc::new(InMemoryAuditLogRepository::new());
        let jobs: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
        let usage: Arc<dyn UsageRepository> = Arc::new(InMemoryUsageRepository::new());

        let credentials = RepositoryCredentials {
            tenants: tenants.clone(),
            users: users.clone(),
            keys: keys.clone(),
            audit: audit.clone(),
        };
        let resolver = AuthResolver::new(
            KeyHasher::new(&config.key_secret),
            credentials.clone(),
            credentials,
        );

        let instance = InstanceId::new();
        let (queue, broadcaster) = transports(config, instance)?;

        let usage_source = Arc::new(RepositoryUsageSource::new(usage.clone()));
        let fanout = FanOut::new(config.hub_buffer, usage_source);
        let mut publisher = UpdatePublisher::new(fanout.clone(), instance);
        if let Some(b) = &broadcaster {
            publisher = publisher.with_broadcaster(b.clone());
        }

        let registry = Arc::new(default_registry());
        let execution = Arc::new(
            ExecutionService::new(
                jobs.clone(),
                usage.clone(),
                tenants.clone(),
                registry.clone(),
                Arc::new(default_pricing()),
                publisher.clone(),
            )
            .with_default_provider(Some(config.default_provider.clone())),
        );
        let submitter = JobSubmitter::new(jobs.clone(), queue.clone(), publisher)
            .best_effort(config.async_best_effort);

        Ok(Self {
            resolver,
            tenants,
            users,
            keys,
            audit,
            jobs,
            usage,
            registry,
            queue,
            fanout,
            broadcaster,
            instance,
            execution,
            submitter,
        })
    }

    pub fn spawn_workers(&self, config: &AppConfig) -> WorkerHandle {
        Worker::new(self.queue.clone(), self.execution.clone()).spawn(
            WorkerConfig::default()
                .with_concurrency(config.worker_concurrency)
                .with_default_provider(Some(config.default_provider.clone())),
        )
    }

    /// Forward other instances' updates into the local hubs, if a broadcaster is configured.
    pub fn spawn_bridge(&self) -> anyhow::Result<Option<BridgeHandle>> {
        let Some(broadcaster) = &self.broadcaster else {
            return Ok(None);
        };
        let handle = UpdateBridge::spawn(broadcaster.clone(), self.fanout.clone(), self.instance)?;
        Ok(Some(handle))
    }

    /// Create a tenant with a legacy key. The raw key is returned once and never stored.
    pub fn bootstrap_tenant(&self, name: &str) -> anyhow::Result<(Tenant, String)> {
        let generated = generate_api_key(self.resolver.hasher());
        let tenant = Tenant::new(name, Utc::now()).with_legacy_key(&generated);
        self.tenants.insert(tenant.clone())?;
        info!(tenant_id = %tenant.id, prefix = %generated.prefix, "bootstrap tenant created");
        Ok((tenant, generated.raw))
    }
}
