use chrono::{DateTime, Utc};

use genflow_auth::{ApiKey, ApiUser, AuditLogEntry, Tenant};
use genflow_core::{ApiKeyId, ApiUserId, JobId, TenantId};
use genflow_jobs::{Job, JobStatus, Usage};

use super::table::InMemoryTable;
use super::{Page, PageResult, StoreError};

pub trait JobRepository: Send + Sync {
    fn insert(&self, job: Job) -> Result<(), StoreError>;

    /// Tenant-scoped lookup.
    fn get(&self, tenant_id: TenantId, id: JobId) -> Result<Job, StoreError>;

    /// Unscoped lookup for workers, which only hold a job id.
    fn find(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Store `job` only if the stored copy is still in status `from`.
    fn transition(&self, job: &Job, from: JobStatus) -> Result<(), StoreError>;

    fn list(&self, tenant_id: TenantId, page: Page) -> Result<PageResult<Job>, StoreError>;
}

pub trait UsageRepository: Send + Sync {
    /// At most one record per job; a second insert is `AlreadyExists`.
    fn insert(&self, usage: Usage) -> Result<(), StoreError>;

    fn for_job(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Usage>, StoreError>;

    fn list_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<Usage>, StoreError>;
}

pub trait TenantRepository: Send + Sync {
    fn insert(&self, tenant: Tenant) -> Result<(), StoreError>;

    fn get(&self, id: TenantId) -> Result<Tenant, StoreError>;

    fn find_by_legacy_hash(&self, key_hash: &str) -> Result<Option<Tenant>, StoreError>;

    fn list(&self, page: Page) -> Result<PageResult<Tenant>, StoreError>;
}

pub trait ApiUserRepository: Send + Sync {
    fn insert(&self, user: ApiUser) -> Result<(), StoreError>;

    fn get(&self, tenant_id: TenantId, id: ApiUserId) -> Result<ApiUser, StoreError>;

    fn update(&self, user: &ApiUser) -> Result<(), StoreError>;

    fn list(&self, tenant_id: TenantId, page: Page) -> Result<PageResult<ApiUser>, StoreError>;
}

pub trait ApiKeyRepository: Send + Sync {
    fn insert(&self, key: ApiKey) -> Result<(), StoreError>;

    fn get(&self, tenant_id: TenantId, id: ApiKeyId) -> Result<ApiKey, StoreError>;

    fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;

    fn update(&self, key: &ApiKey) -> Result<(), StoreError>;

    fn record_use(
        &self,
        id: ApiKeyId,
        now: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), StoreError>;

    fn list_for_user(
        &self,
        tenant_id: TenantId,
        api_user_id: ApiUserId,
        page: Page,
    ) -> Result<PageResult<ApiKey>, StoreError>;
}

/// Append-only.
pub trait AuditLogRepository: Send + Sync {
    fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError>;

    fn list(
        &self,
        tenant_id: TenantId,
        page: Page,
    ) -> Result<PageResult<AuditLogEntry>, StoreError>;
}

pub struct InMemoryJobRepository {
    table: InMemoryTable<Job>,
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self {
            table: InMemoryTable::new("job"),
        }
    }
}

impl JobRepository for InMemoryJobRepository {
    fn insert(&self, job: Job) -> Result<(), StoreError> {
        self.table.insert(job)
    }

    fn get(&self, tenant_id: TenantId, id: JobId) -> Result<Job, StoreError> {
        self.table
            .get(&id)?
            .filter(|job| job.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::not_found("job", id))
    }

    fn find(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.table.get(&id)
    }

    fn transition(&self, job: &Job, from: JobStatus) -> Result<(), StoreError> {
        self.table.modify(&job.id, |stored| {
            if stored.tenant_id != job.tenant_id {
                return Err(StoreError::not_found("job", job.id));
            }
            if stored.status != from {
                return Err(StoreError::Conflict(format!(
                    "job {} is {}, expected {}",
                    job.id, stored.status, from
                )));
            }
            *stored = job.clone();
            Ok(())
        })
    }

    fn list(&self, tenant_id: TenantId, page: Page) -> Result<PageResult<Job>, StoreError> {
        self.table.page(|job| job.tenant_id == tenant_id, page)
    }
}

pub struct InMemoryUsageRepository {
    table: InMemoryTable<Usage>,
}

impl Default for InMemoryUsageRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUsageRepository {
    pub fn new() -> Self {
        Self {
            table: InMemoryTable::new("usage"),
        }
    }
}

impl UsageRepository for InMemoryUsageRepository {
    fn insert(&self, usage: Usage) -> Result<(), StoreError> {
        let job_id = usage.job_id;
        self.table.insert_unless(usage, |u| u.job_id == job_id, || StoreError::AlreadyExists {
            entity: "usage",
            id: job_id.to_string(),
        })
    }

    fn for_job(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<Usage>, StoreError> {
        self.table
            .find(|u| u.job_id == job_id && u.tenant_id == tenant_id)
    }

    fn list_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<Usage>, StoreError> {
        self.table.filter(|u| u.tenant_id == tenant_id)
    }
}

pub struct InMemoryTenantRepository {
    table: InMemoryTable<Tenant>,
}

impl Default for InMemoryTenantRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTenantRepository {
    pub fn new() -> Self {
        Self {
            table: InMemoryTable::new("tenant"),
        }
    }
}

impl TenantRepository for InMemoryTenantRepository {
    fn insert(&self, tenant: Tenant) -> Result<(), StoreError> {
        self.table.insert(tenant)
    }

    fn get(&self, id: TenantId) -> Result<Tenant, StoreError> {
        self.table
            .get(&id)?
            .ok_or_else(|| StoreError::not_found("tenant", id))
    }

    fn find_by_legacy_hash(&self, key_hash: &str) -> Result<Option<Tenant>, StoreError> {
        self.table
            .find(|t| t.legacy_key_hash.as_deref() == Some(key_hash))
    }

    fn list(&self, page: Page) -> Result<PageResult<Tenant>, StoreError> {
        self.table.page(|_| true, page)
    }
}

pub struct InMemoryApiUserRepository {
    table: InMemoryTable<ApiUser>,
}

impl Default for InMemoryApiUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryApiUserRepository {
    pub fn new() -> Self {
        Self {
            table: InMemoryTable::new("api user"),
        }
    }
}

impl ApiUserRepository for InMemoryApiUserRepository {
    fn insert(&self, user: ApiUser) -> Result<(), StoreError> {
        self.table.insert(user)
    }

    fn get(&self, tenant_id: TenantId, id: ApiUserId) -> Result<ApiUser, StoreError> {
        self.table
            .get(&id)?
            .filter(|u| u.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::not_found("api user", id))
    }

    fn update(&self, user: &ApiUser) -> Result<(), StoreError> {
        self.table.modify(&user.id, |stored| {
            if stored.tenant_id != user.tenant_id {
                return Err(StoreError::not_found("api user", user.id));
            }
            *stored = user.clone();
            Ok(())
        })
    }

    fn list(&self, tenant_id: TenantId, page: Page) -> Result<PageResult<ApiUser>, StoreError> {
        self.table.page(|u| u.tenant_id == tenant_id, page)
    }
}

pub struct InMemoryApiKeyRepository {
    table: InMemoryTable<ApiKey>,
}

impl Default for InMemoryApiKeyRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryApiKeyRepository {
    pub fn new() -> Self {
        Self {
            table: InMemoryTable::new("api key"),
        }
    }
}

impl ApiKeyRepository for InMemoryApiKeyRepository {
    fn insert(&self, key: ApiKey) -> Result<(), StoreError> {
        let hash = key.key_hash.clone();
        self.table.insert_unless(key, |k| k.key_hash == hash, || {
            StoreError::Conflict("api key hash collision".into())
        })
    }

    fn get(&self, tenant_id: TenantId, id: ApiKeyId) -> Result<ApiKey, StoreError> {
        self.table
            .get(&id)?
            .filter(|k| k.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::not_found("api key", id))
    }

    fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        self.table.find(|k| k.key_hash == key_hash)
    }

    fn update(&self, key: &ApiKey) -> Result<(), StoreError> {
        self.table.modify(&key.id, |stored| {
            if stored.tenant_id != key.tenant_id {
                return Err(StoreError::not_found("api key", key.id));
            }
            *stored = key.clone();
            Ok(())
        })
    }

    fn record_use(
        &self,
        id: ApiKeyId,
        now: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), StoreError> {
        self.table.modify(&id, |stored| {
            stored.record_use(now, ip);
            Ok(())
        })
    }

    fn list_for_user(
        &self,
        tenant_id: TenantId,
        api_user_id: ApiUserId,
        page: Page,
    ) -> Result<PageResult<ApiKey>, StoreError> {
        self.table
            .page(|k| k.tenant_id == tenant_id && k.api_user_id == api_user_id, page)
    }
}

pub struct InMemoryAuditLogRepository {
    table: InMemoryTable<AuditLogEntry>,
}

impl Default for InMemoryAuditLogRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuditLogRepository {
    pub fn new() -> Self {
        Self {
            table: InMemoryTable::new("audit log entry"),
        }
    }
}

impl AuditLogRepository for InMemoryAuditLogRepository {
    fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError> {
        self.table.insert(entry)
    }

    fn list(
        &self,
        tenant_id: TenantId,
        page: Page,
    ) -> Result<PageResult<AuditLogEntry>, StoreError> {
        self.table.page(|e| e.tenant_id == Some(tenant_id), page)
    }
}
