use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::error;

use genflow_auth::{ApiKey, ApiUser, AuditLogEntry, AuditSink, AuthError, CredentialStore, Tenant};
use genflow_core::{ApiKeyId, ApiUserId, TenantId};
use genflow_events::UsageSource;
use genflow_jobs::TenantUsage;

use super::repositories::{
    ApiKeyRepository, ApiUserRepository, AuditLogRepository, TenantRepository, UsageRepository,
};
use super::StoreError;

fn auth_store_error(err: StoreError) -> AuthError {
    AuthError::Store(err.to_string())
}

/// Credential lookups for the auth resolver, backed by the repositories.
#[derive(Clone)]
pub struct RepositoryCredentials {
    pub tenants: Arc<dyn TenantRepository>,
    pub users: Arc<dyn ApiUserRepository>,
    pub keys: Arc<dyn ApiKeyRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
}

impl CredentialStore for RepositoryCredentials {
    fn find_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, AuthError> {
        self.keys.find_by_hash(key_hash).map_err(auth_store_error)
    }

    fn find_user(&self, tenant_id: TenantId, id: ApiUserId) -> Result<Option<ApiUser>, AuthError> {
        match self.users.get(tenant_id, id) {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(auth_store_error(e)),
        }
    }

    fn find_tenant_by_legacy_hash(&self, key_hash: &str) -> Result<Option<Tenant>, AuthError> {
        self.tenants
            .find_by_legacy_hash(key_hash)
            .map_err(auth_store_error)
    }

    fn record_key_use(
        &self,
        key_id: ApiKeyId,
        now: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), AuthError> {
        self.keys
            .record_use(key_id, now, ip)
            .map_err(auth_store_error)
    }
}

impl AuditSink for RepositoryCredentials {
    fn record(&self, entry: AuditLogEntry) {
        let action = entry.action;
        if let Err(e) = self.audit.append(entry) {
            error!(action = action.as_str(), error = %e, "failed to append audit log entry");
        }
    }
}

/// Recomputes a tenant's usage view from stored usage records.
#[derive(Clone)]
pub struct RepositoryUsageSource {
    usage: Arc<dyn UsageRepository>,
}

impl RepositoryUsageSource {
    pub fn new(usage: Arc<dyn UsageRepository>) -> Self {
        Self { usage }
    }
}

impl UsageSource for RepositoryUsageSource {
    fn tenant_usage(&self, tenant_id: TenantId) -> Option<TenantUsage> {
        match self.usage.list_for_tenant(tenant_id) {
            Ok(records) => Some(TenantUsage::compute(tenant_id, records.iter())),
            Err(e) => {
                error!(tenant_id = %tenant_id, error = %e, "usage refresh failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        InMemoryApiKeyRepository, InMemoryApiUserRepository, InMemoryAuditLogRepository,
        InMemoryTenantRepository, Page,
    };
    use genflow_auth::{AuditAction, AuthResolver, KeyHasher, RequestMeta, Scope, generate_api_key};

    fn credentials() -> RepositoryCredentials {
        RepositoryCredentials {
            tenants: Arc::new(InMemoryTenantRepository::new()),
            users: Arc::new(InMemoryApiUserRepository::new()),
            keys: Arc::new(InMemoryApiKeyRepository::new()),
            audit: Arc::new(InMemoryAuditLogRepository::new()),
        }
    }

    #[test]
    fn resolver_runs_against_repositories() {
        let creds = credentials();
        let hasher = KeyHasher::new("secret");
        let now = Utc::now();

        let tenant = Tenant::new("acme", now);
        creds.tenants.insert(tenant.clone()).unwrap();
        let user = ApiUser::new(tenant.id, "bot", None, now).unwrap();
        creds.users.insert(user.clone()).unwrap();
        let generated = generate_api_key(&hasher);
        let key = ApiKey::issue(tenant.id, user.id, "ci", vec![Scope::READ], None, &generated, now);
        creds.keys.insert(key.clone()).unwrap();

        let resolver = AuthResolver::new(hasher, creds.clone(), creds.clone());
        let ctx = resolver
            .resolve(Some(&generated.raw), &RequestMeta::default(), now)
            .unwrap();
        assert_eq!(ctx.key_id, Some(key.id));
        assert_eq!(creds.keys.get(tenant.id, key.id).unwrap().usage_count, 1);

        let logged = creds.audit.list(tenant.id, Page::default()).unwrap();
        assert_eq!(logged.items[0].action, AuditAction::AuthSuccess);
    }

    #[test]
    fn missing_user_is_none_not_error() {
        let creds = credentials();
        assert_eq!(creds.find_user(TenantId::new(), ApiUserId::new()).unwrap(), None);
    }
}
