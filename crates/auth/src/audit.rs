//! Append-only security audit trail.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use genflow_core::{ApiKeyId, ApiUserId, AuditLogId, Entity, TenantId};

use crate::context::AuthContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    KeyCreated,
    KeyRevoked,
    UserCreated,
    UserDeactivated,
    AuthSuccess,
    AuthFailure,
    ScopeViolation,
    RequestActivity,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::KeyCreated => "key_created",
            AuditAction::KeyRevoked => "key_revoked",
            AuditAction::UserCreated => "user_created",
            AuditAction::UserDeactivated => "user_deactivated",
            AuditAction::AuthSuccess => "auth_success",
            AuditAction::AuthFailure => "auth_failure",
            AuditAction::ScopeViolation => "scope_violation",
            AuditAction::RequestActivity => "request_activity",
        }
    }
}

/// One security-relevant event. Never mutated after creation.
///
/// `tenant_id` is empty for failures where the presented key matched nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: AuditLogId,
    pub tenant_id: Option<TenantId>,
    pub api_user_id: Option<ApiUserId>,
    pub key_id: Option<ApiKeyId>,
    pub action: AuditAction,
    pub reason: Option<String>,
    pub details: JsonValue,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(action: AuditAction, now: DateTime<Utc>) -> Self {
        Self {
            id: AuditLogId::new(),
            tenant_id: None,
            api_user_id: None,
            key_id: None,
            action,
            reason: None,
            details: JsonValue::Null,
            ip_address: None,
            user_agent: None,
            created_at: now,
        }
    }

    /// Attribute the entry to the actor of `ctx`.
    pub fn by(mut self, ctx: &AuthContext) -> Self {
        self.tenant_id = Some(ctx.tenant_id);
        self.api_user_id = ctx.api_user_id;
        self.key_id = ctx.key_id;
        self.ip_address = ctx.client_ip.clone();
        self.user_agent = ctx.user_agent.clone();
        self
    }

    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn user(mut self, api_user_id: Option<ApiUserId>) -> Self {
        self.api_user_id = api_user_id;
        self
    }

    pub fn key(mut self, key_id: Option<ApiKeyId>) -> Self {
        self.key_id = key_id;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }

    pub fn client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip;
        self.user_agent = user_agent;
        self
    }
}

impl Entity for AuditLogEntry {
    type Id = AuditLogId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
