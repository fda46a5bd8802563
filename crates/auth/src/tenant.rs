//! Tenants and the API users that own scoped keys.

use chrono::{DateTime, Utc};
use serde::Serialize;

use genflow_core::{ApiUserId, DomainError, DomainResult, Entity, TenantId};

use crate::key::GeneratedKey;

/// Billing and isolation boundary.
///
/// A tenant may carry one legacy tenant-level key, which authenticates with
/// every scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub default_provider: Option<String>,
    #[serde(skip)]
    pub legacy_key_hash: Option<String>,
    pub legacy_key_prefix: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: TenantId::new(),
            name: name.into(),
            default_provider: None,
            legacy_key_hash: None,
            legacy_key_prefix: None,
            created_at: now,
        }
    }

    pub fn with_default_provider(mut self, provider: Option<String>) -> Self {
        self.default_provider = provider;
        self
    }

    pub fn with_legacy_key(mut self, key: &GeneratedKey) -> Self {
        self.legacy_key_hash = Some(key.hash.clone());
        self.legacy_key_prefix = Some(key.prefix.clone());
        self
    }
}

impl Entity for Tenant {
    type Id = TenantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A named machine or human identity inside a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
    pub id: ApiUserId,
    pub tenant_id: TenantId,
    pub name: String,
    pub email: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl ApiUser {
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        email: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("name must not be empty"));
        }
        if let Some(email) = &email {
            if !email.contains('@') {
                return Err(DomainError::validation("email is not valid"));
            }
        }

        Ok(Self {
            id: ApiUserId::new(),
            tenant_id,
            name,
            email,
            active: true,
            created_at: now,
            deactivated_at: None,
        })
    }

    /// Returns `false` if the user was already inactive.
    pub fn deactivate(&mut self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.deactivated_at = Some(now);
        true
    }
}

impl Entity for ApiUser {
    type Id = ApiUserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
