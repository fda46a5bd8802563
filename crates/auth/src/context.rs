use serde::Serialize;

use genflow_core::{ApiKeyId, ApiUserId, TenantId};

use crate::error::AuthError;
use crate::scope::Scope;

/// Resolved identity of one request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub tenant_id: TenantId,
    pub api_user_id: Option<ApiUserId>,
    pub key_id: Option<ApiKeyId>,
    pub scopes: Vec<Scope>,
    pub client_ip: Option<String>,
    #[serde(skip)]
    pub user_agent: Option<String>,
}

impl AuthContext {
    /// Context for a tenant-level key issued before scoped keys existed.
    pub fn legacy(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            api_user_id: None,
            key_id: None,
            scopes: vec![Scope::WILDCARD],
            client_ip: None,
            user_agent: None,
        }
    }

    pub fn scoped(
        tenant_id: TenantId,
        api_user_id: ApiUserId,
        key_id: ApiKeyId,
        scopes: Vec<Scope>,
    ) -> Self {
        Self {
            tenant_id,
            api_user_id: Some(api_user_id),
            key_id: Some(key_id),
            scopes,
            client_ip: None,
            user_agent: None,
        }
    }

    pub fn with_client(mut self, client_ip: Option<String>, user_agent: Option<String>) -> Self {
        self.client_ip = client_ip;
        self.user_agent = user_agent;
        self
    }

    pub fn is_legacy(&self) -> bool {
        self.api_user_id.is_none()
    }

    pub fn has_scope(&self, required: &Scope) -> bool {
        self.is_legacy() || self.scopes.iter().any(|s| s.is_wildcard() || s == required)
    }

    pub fn require_scope(&self, required: &Scope) -> Result<(), AuthError> {
        if self.has_scope(required) {
            Ok(())
        } else {
            Err(AuthError::InsufficientScope {
                required: required.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(scopes: Vec<Scope>) -> AuthContext {
        AuthContext::scoped(TenantId::new(), ApiUserId::new(), ApiKeyId::new(), scopes)
    }

    #[test]
    fn legacy_context_has_every_scope() {
        let ctx = AuthContext::legacy(TenantId::new());
        for scope in Scope::all() {
            assert!(ctx.require_scope(&scope).is_ok());
        }
    }

    #[test]
    fn scoped_context_needs_exact_or_wildcard() {
        let ctx = scoped(vec![Scope::READ]);
        assert!(ctx.require_scope(&Scope::READ).is_ok());
        assert_eq!(
            ctx.require_scope(&Scope::ADMIN),
            Err(AuthError::InsufficientScope { required: "admin".into() })
        );

        let ctx = scoped(vec![Scope::WILDCARD]);
        assert!(ctx.require_scope(&Scope::ADMIN).is_ok());
    }

    #[test]
    fn scoped_context_with_no_scopes_is_denied() {
        let ctx = scoped(vec![]);
        assert!(!ctx.has_scope(&Scope::READ));
    }
}
