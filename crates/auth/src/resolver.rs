//! Turns a presented API key into an [`AuthContext`].
//!
//! Every call goes back to the credential store; nothing is cached, so a
//! revocation is honoured on the very next request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};

use genflow_core::{ApiKeyId, ApiUserId, TenantId};

use crate::audit::{AuditAction, AuditLogEntry};
use crate::context::AuthContext;
use crate::error::AuthError;
use crate::key::{ApiKey, KeyHasher, KeyRejection};
use crate::scope::Scope;
use crate::tenant::{ApiUser, Tenant};

/// Read/update access to credentials, implemented by the storage layer.
pub trait CredentialStore: Send + Sync {
    fn find_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, AuthError>;

    fn find_user(&self, tenant_id: TenantId, id: ApiUserId) -> Result<Option<ApiUser>, AuthError>;

    fn find_tenant_by_legacy_hash(&self, key_hash: &str) -> Result<Option<Tenant>, AuthError>;

    fn record_key_use(
        &self,
        key_id: ApiKeyId,
        now: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), AuthError>;
}

/// Destination for audit entries. Appends only.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditLogEntry);
}

impl<S> CredentialStore for Arc<S>
where
    S: CredentialStore + ?Sized,
{
    fn find_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, AuthError> {
        (**self).find_key_by_hash(key_hash)
    }

    fn find_user(&self, tenant_id: TenantId, id: ApiUserId) -> Result<Option<ApiUser>, AuthError> {
        (**self).find_user(tenant_id, id)
    }

    fn find_tenant_by_legacy_hash(&self, key_hash: &str) -> Result<Option<Tenant>, AuthError> {
        (**self).find_tenant_by_legacy_hash(key_hash)
    }

    fn record_key_use(
        &self,
        key_id: ApiKeyId,
        now: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), AuthError> {
        (**self).record_key_use(key_id, now, ip)
    }
}

impl<A> AuditSink for Arc<A>
where
    A: AuditSink + ?Sized,
{
    fn record(&self, entry: AuditLogEntry) {
        (**self).record(entry)
    }
}

/// Transport details of the request being authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub path: Option<String>,
}

pub struct AuthResolver<C, A> {
    hasher: KeyHasher,
    store: C,
    audit: A,
}

impl<C: CredentialStore, A: AuditSink> AuthResolver<C, A> {
    pub fn new(hasher: KeyHasher, store: C, audit: A) -> Self {
        Self { hasher, store, audit }
    }

    pub fn hasher(&self) -> &KeyHasher {
        &self.hasher
    }

    /// Authenticate a raw key.
    ///
    /// Scoped keys are looked up by hash first, then the tenant-level legacy
    /// key. Each refusal is audited with its precise reason while the caller
    /// only ever sees [`AuthError::InvalidCredential`].
    pub fn resolve(
        &self,
        raw: Option<&str>,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<AuthContext, AuthError> {
        let raw = match raw.map(str::trim).filter(|r| !r.is_empty()) {
            Some(raw) => raw,
            None => {
                self.audit_failure(None, None, None, "missing", meta, now);
                return Err(AuthError::MissingCredential);
            }
        };

        let key_hash = self.hasher.hash(raw);

        if let Some(key) = self.store.find_key_by_hash(&key_hash)? {
            return self.resolve_scoped(key, meta, now);
        }

        if let Some(tenant) = self.store.find_tenant_by_legacy_hash(&key_hash)? {
            let ctx = AuthContext::legacy(tenant.id)
                .with_client(meta.ip.clone(), meta.user_agent.clone());
            self.audit.record(
                AuditLogEntry::new(AuditAction::AuthSuccess, now)
                    .by(&ctx)
                    .reason("legacy_key")
                    .details(path_details(meta)),
            );
            return Ok(ctx);
        }

        self.audit_failure(None, None, None, KeyRejection::NotFound.as_str(), meta, now);
        Err(AuthError::InvalidCredential)
    }

    fn resolve_scoped(
        &self,
        key: ApiKey,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<AuthContext, AuthError> {
        let reject = |reason: KeyRejection| {
            self.audit_failure(
                Some(key.tenant_id),
                Some(key.api_user_id),
                Some(key.id),
                reason.as_str(),
                meta,
                now,
            );
            AuthError::InvalidCredential
        };

        key.check_usable(now).map_err(reject)?;

        match self.store.find_user(key.tenant_id, key.api_user_id)? {
            Some(user) if user.active => {}
            _ => return Err(reject(KeyRejection::UserInactive)),
        }

        self.store.record_key_use(key.id, now, meta.ip.as_deref())?;

        let ctx = AuthContext::scoped(key.tenant_id, key.api_user_id, key.id, key.scopes.clone())
            .with_client(meta.ip.clone(), meta.user_agent.clone());
        self.audit.record(
            AuditLogEntry::new(AuditAction::AuthSuccess, now)
                .by(&ctx)
                .details(path_details(meta)),
        );
        debug!(tenant_id = %ctx.tenant_id, key_id = %key.id, "api key authenticated");
        Ok(ctx)
    }

    /// Check `required` for `ctx`, auditing a violation.
    pub fn authorize(
        &self,
        ctx: &AuthContext,
        required: &Scope,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        ctx.require_scope(required).inspect_err(|_| {
            warn!(tenant_id = %ctx.tenant_id, required = %required, "scope violation");
            self.audit.record(
                AuditLogEntry::new(AuditAction::ScopeViolation, now)
                    .by(ctx)
                    .reason(format!("missing scope '{required}'")),
            );
        })
    }

    pub fn audit(&self, entry: AuditLogEntry) {
        self.audit.record(entry);
    }

    fn audit_failure(
        &self,
        tenant_id: Option<TenantId>,
        api_user_id: Option<ApiUserId>,
        key_id: Option<ApiKeyId>,
        reason: &str,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) {
        warn!(reason, ip = ?meta.ip, "api key rejected");
        let mut entry = AuditLogEntry::new(AuditAction::AuthFailure, now)
            .user(api_user_id)
            .key(key_id)
            .reason(reason)
            .client(meta.ip.clone(), meta.user_agent.clone())
            .details(path_details(meta));
        entry.tenant_id = tenant_id;
        self.audit.record(entry);
    }
}

fn path_details(meta: &RequestMeta) -> serde_json::Value {
    match &meta.path {
        Some(path) => json!({ "path": path }),
        None => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Duration;

    use crate::key::{generate_api_key, GeneratedKey};

    #[derive(Default)]
    struct MemStore {
        keys: Mutex<HashMap<String, ApiKey>>,
        users: Mutex<HashMap<ApiUserId, ApiUser>>,
        tenants: Mutex<Vec<Tenant>>,
    }

    impl CredentialStore for MemStore {
        fn find_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, AuthError> {
            Ok(self.keys.lock().unwrap().get(key_hash).cloned())
        }

        fn find_user(
            &self,
            tenant_id: TenantId,
            id: ApiUserId,
        ) -> Result<Option<ApiUser>, AuthError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .get(&id)
                .filter(|u| u.tenant_id == tenant_id)
                .cloned())
        }

        fn find_tenant_by_legacy_hash(&self, key_hash: &str) -> Result<Option<Tenant>, AuthError> {
            Ok(self
                .tenants
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.legacy_key_hash.as_deref() == Some(key_hash))
                .cloned())
        }

        fn record_key_use(
            &self,
            key_id: ApiKeyId,
            now: DateTime<Utc>,
            ip: Option<&str>,
        ) -> Result<(), AuthError> {
            for key in self.keys.lock().unwrap().values_mut() {
                if key.id == key_id {
                    key.record_use(now, ip);
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemAudit(Mutex<Vec<AuditLogEntry>>);

    impl AuditSink for MemAudit {
        fn record(&self, entry: AuditLogEntry) {
            self.0.lock().unwrap().push(entry);
        }
    }

    impl MemAudit {
        fn last(&self) -> AuditLogEntry {
            self.0.lock().unwrap().last().cloned().unwrap()
        }
    }

    struct Fixture {
        resolver: AuthResolver<Arc<MemStore>, Arc<MemAudit>>,
        store: Arc<MemStore>,
        audit: Arc<MemAudit>,
        tenant: TenantId,
        user: ApiUserId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemStore::default());
        let audit = Arc::new(MemAudit::default());
        let tenant = TenantId::new();
        let user = ApiUser::new(tenant, "ci", None, Utc::now()).unwrap();
        let user_id = user.id;
        store.users.lock().unwrap().insert(user.id, user);

        Fixture {
            resolver: AuthResolver::new(KeyHasher::new("secret"), store.clone(), audit.clone()),
            store,
            audit,
            tenant,
            user: user_id,
        }
    }

    fn add_key(
        f: &Fixture,
        scopes: Vec<Scope>,
        expires_at: Option<DateTime<Utc>>,
    ) -> (ApiKey, GeneratedKey) {
        let generated = generate_api_key(f.resolver.hasher());
        let key = ApiKey::issue(f.tenant, f.user, "k", scopes, expires_at, &generated, Utc::now());
        f.store.keys.lock().unwrap().insert(key.key_hash.clone(), key.clone());
        (key, generated)
    }

    #[test]
    fn generated_key_resolves_to_same_logical_key() {
        let f = fixture();
        let (key, generated) = add_key(&f, vec![Scope::READ], None);

        let ctx = f
            .resolver
            .resolve(Some(&generated.raw), &RequestMeta::default(), Utc::now())
            .unwrap();
        assert_eq!(ctx.key_id, Some(key.id));
        assert_eq!(ctx.tenant_id, f.tenant);
        assert_eq!(ctx.scopes, vec![Scope::READ]);
        assert!(!ctx.is_legacy());
        assert_eq!(f.audit.last().action, AuditAction::AuthSuccess);

        let stored = f.store.find_key_by_hash(&key.key_hash).unwrap().unwrap();
        assert_eq!(stored.usage_count, 1);
    }

    #[test]
    fn revoked_key_fails_on_next_call() {
        let f = fixture();
        let (key, generated) = add_key(&f, vec![Scope::READ], None);
        let meta = RequestMeta::default();

        assert!(f.resolver.resolve(Some(&generated.raw), &meta, Utc::now()).is_ok());

        f.store
            .keys
            .lock()
            .unwrap()
            .get_mut(&key.key_hash)
            .unwrap()
            .revoke(Utc::now());

        for _ in 0..3 {
            let err = f.resolver.resolve(Some(&generated.raw), &meta, Utc::now()).unwrap_err();
            assert_eq!(err, AuthError::InvalidCredential);
        }
        let last = f.audit.last();
        assert_eq!(last.action, AuditAction::AuthFailure);
        assert_eq!(last.reason.as_deref(), Some("revoked"));
        assert_eq!(last.key_id, Some(key.id));
    }

    #[test]
    fn each_rejection_has_distinct_audit_reason_but_same_error() {
        let f = fixture();
        let meta = RequestMeta {
            ip: Some("203.0.113.9".into()),
            user_agent: Some("curl/8".into()),
            path: Some("/v1/jobs".into()),
        };

        let err = f.resolver.resolve(Some("gf_live_unknown"), &meta, Utc::now()).unwrap_err();
        assert_eq!(err, AuthError::InvalidCredential);
        let entry = f.audit.last();
        assert_eq!(entry.reason.as_deref(), Some("not_found"));
        assert_eq!(entry.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(entry.user_agent.as_deref(), Some("curl/8"));

        let (_, expired) = add_key(&f, vec![Scope::READ], Some(Utc::now() - Duration::minutes(1)));
        let err = f.resolver.resolve(Some(&expired.raw), &meta, Utc::now()).unwrap_err();
        assert_eq!(err, AuthError::InvalidCredential);
        assert_eq!(f.audit.last().reason.as_deref(), Some("expired"));

        let (inactive_key, inactive) = add_key(&f, vec![Scope::READ], None);
        f.store.keys.lock().unwrap().get_mut(&inactive_key.key_hash).unwrap().active = false;
        let err = f.resolver.resolve(Some(&inactive.raw), &meta, Utc::now()).unwrap_err();
        assert_eq!(err, AuthError::InvalidCredential);
        assert_eq!(f.audit.last().reason.as_deref(), Some("inactive"));
    }

    #[test]
    fn deactivated_user_invalidates_keys() {
        let f = fixture();
        let (_, generated) = add_key(&f, vec![Scope::WRITE], None);
        f.store.users.lock().unwrap().get_mut(&f.user).unwrap().deactivate(Utc::now());

        let err = f
            .resolver
            .resolve(Some(&generated.raw), &RequestMeta::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredential);
        assert_eq!(f.audit.last().reason.as_deref(), Some("user_inactive"));
    }

    #[test]
    fn missing_key_is_distinct_error() {
        let f = fixture();
        assert_eq!(
            f.resolver.resolve(None, &RequestMeta::default(), Utc::now()).unwrap_err(),
            AuthError::MissingCredential
        );
        assert_eq!(
            f.resolver.resolve(Some("  "), &RequestMeta::default(), Utc::now()).unwrap_err(),
            AuthError::MissingCredential
        );
    }

    #[test]
    fn legacy_tenant_key_gets_every_scope() {
        let f = fixture();
        let generated = generate_api_key(f.resolver.hasher());
        let tenant = Tenant::new("acme", Utc::now()).with_legacy_key(&generated);
        let tenant_id = tenant.id;
        f.store.tenants.lock().unwrap().push(tenant);

        let ctx = f
            .resolver
            .resolve(Some(&generated.raw), &RequestMeta::default(), Utc::now())
            .unwrap();
        assert!(ctx.is_legacy());
        assert_eq!(ctx.tenant_id, tenant_id);
        assert!(f.resolver.authorize(&ctx, &Scope::ADMIN, Utc::now()).is_ok());
    }

    #[test]
    fn scope_violation_is_audited() {
        let f = fixture();
        let (_, generated) = add_key(&f, vec![Scope::READ], None);
        let ctx = f
            .resolver
            .resolve(Some(&generated.raw), &RequestMeta::default(), Utc::now())
            .unwrap();

        let err = f.resolver.authorize(&ctx, &Scope::ADMIN, Utc::now()).unwrap_err();
        assert!(matches!(err, AuthError::InsufficientScope { .. }));
        let entry = f.audit.last();
        assert_eq!(entry.action, AuditAction::ScopeViolation);
        assert_eq!(entry.tenant_id, Some(f.tenant));
    }
}
