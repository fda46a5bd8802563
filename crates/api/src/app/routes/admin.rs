//! Tenant administration: API users, their keys, and the audit trail.
//!
//! Every route requires the `admin` scope. A key can only grant scopes it
//! holds itself.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use genflow_auth::{
    ApiKey, ApiUser, AuditAction, AuditLogEntry, AuthContext, AuthError, Scope, generate_api_key,
};
use genflow_core::{ApiKeyId, ApiUserId};
use genflow_infra::store::{Page, PageResult};

use super::parse_id;
use crate::app::dto::{CreateKeyBody, CreateUserBody};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::middleware::require;

pub fn router() -> Router {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route("/users/:id/deactivate", post(deactivate_user))
        .route("/users/:id/keys", post(create_key).get(list_keys))
        .route("/keys/:id/revoke", post(revoke_key))
        .route("/audit-logs", get(list_audit_logs))
}

/// A freshly issued key. `key` is the only time the raw secret is shown.
#[derive(Debug, Serialize)]
pub struct IssuedKey {
    #[serde(flatten)]
    pub api_key: ApiKey,
    pub key: String,
}

fn audit(ctx: &AuthContext, action: AuditAction) -> AuditLogEntry {
    AuditLogEntry::new(action, Utc::now()).by(ctx)
}

/// POST /v1/admin/users
pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateUserBody>,
) -> Result<(StatusCode, Json<ApiUser>), Response> {
    require(&services, &ctx, Scope::ADMIN)?;

    let user = ApiUser::new(ctx.tenant_id, body.name, body.email, Utc::now())
        .map_err(|e| errors::bad_request(e.to_string()))?;
    services
        .users
        .insert(user.clone())
        .map_err(errors::store_error_to_response)?;

    services.resolver.audit(
        audit(&ctx, AuditAction::UserCreated)
            .details(json!({ "createdUserId": user.id, "name": user.name })),
    );
    info!(tenant_id = %ctx.tenant_id, api_user_id = %user.id, "api user created");
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /v1/admin/users
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Query(page): Query<Page>,
) -> Result<Json<PageResult<ApiUser>>, Response> {
    require(&services, &ctx, Scope::ADMIN)?;
    services
        .users
        .list(ctx.tenant_id, page)
        .map(Json)
        .map_err(errors::store_error_to_response)
}

/// POST /v1/admin/users/:id/deactivate
pub async fn deactivate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiUser>, Response> {
    require(&services, &ctx, Scope::ADMIN)?;
    let id: ApiUserId = parse_id(&id, "user")?;

    let mut user = services
        .users
        .get(ctx.tenant_id, id)
        .map_err(errors::store_error_to_response)?;
    if user.deactivate(Utc::now()) {
        services
            .users
            .update(&user)
            .map_err(errors::store_error_to_response)?;
        services.resolver.audit(
            audit(&ctx, AuditAction::UserDeactivated)
                .details(json!({ "deactivatedUserId": user.id })),
        );
        info!(tenant_id = %ctx.tenant_id, api_user_id = %user.id, "api user deactivated");
    }
    Ok(Json(user))
}

/// POST /v1/admin/users/:id/keys
pub async fn create_key(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<CreateKeyBody>,
) -> Result<(StatusCode, Json<IssuedKey>), Response> {
    require(&services, &ctx, Scope::ADMIN)?;
    let user_id: ApiUserId = parse_id(&id, "user")?;

    let scopes = body.parsed_scopes().map_err(errors::auth_error_to_response)?;
    if let Some(missing) = scopes.iter().find(|s| !ctx.has_scope(s)) {
        let err = AuthError::InsufficientScope {
            required: missing.to_string(),
        };
        services.resolver.audit(
            audit(&ctx, AuditAction::ScopeViolation)
                .reason(format!("cannot grant scope '{missing}'")),
        );
        return Err(errors::auth_error_to_response(err));
    }
    if body.name.trim().is_empty() {
        return Err(errors::bad_request("key name must not be empty"));
    }

    let user = services
        .users
        .get(ctx.tenant_id, user_id)
        .map_err(errors::store_error_to_response)?;
    if !user.active {
        return Err(errors::bad_request("cannot issue a key to an inactive user"));
    }

    let now = Utc::now();
    if body.expires_at.is_some_and(|at| at <= now) {
        return Err(errors::bad_request("expiresAt must be in the future"));
    }

    let generated = generate_api_key(services.resolver.hasher());
    let key = ApiKey::issue(
        ctx.tenant_id,
        user.id,
        body.name.trim(),
        scopes,
        body.expires_at,
        &generated,
        now,
    );
    services
        .keys
        .insert(key.clone())
        .map_err(errors::store_error_to_response)?;

    services.resolver.audit(
        audit(&ctx, AuditAction::KeyCreated)
            .details(json!({ "createdKeyId": key.id, "forUserId": user.id, "prefix": key.prefix })),
    );
    info!(tenant_id = %ctx.tenant_id, key_id = %key.id, prefix = %key.prefix, "api key issued");

    Ok((
        StatusCode::CREATED,
        Json(IssuedKey {
            api_key: key,
            key: generated.raw,
        }),
    ))
}

/// GET /v1/admin/users/:id/keys
pub async fn list_keys(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<PageResult<ApiKey>>, Response> {
    require(&services, &ctx, Scope::ADMIN)?;
    let user_id: ApiUserId = parse_id(&id, "user")?;
    services
        .users
        .get(ctx.tenant_id, user_id)
        .map_err(errors::store_error_to_response)?;
    services
        .keys
        .list_for_user(ctx.tenant_id, user_id, page)
        .map(Json)
        .map_err(errors::store_error_to_response)
}

/// POST /v1/admin/keys/:id/revoke (idempotent)
pub async fn revoke_key(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiKey>, Response> {
    require(&services, &ctx, Scope::ADMIN)?;
    let id: ApiKeyId = parse_id(&id, "key")?;

    let mut key = services
        .keys
        .get(ctx.tenant_id, id)
        .map_err(errors::store_error_to_response)?;
    if key.revoke(Utc::now()) {
        services
            .keys
            .update(&key)
            .map_err(errors::store_error_to_response)?;
        services.resolver.audit(
            audit(&ctx, AuditAction::KeyRevoked).details(json!({ "revokedKeyId": key.id })),
        );
        info!(tenant_id = %ctx.tenant_id, key_id = %key.id, "api key revoked");
    }
    Ok(Json(key))
}

/// GET /v1/admin/audit-logs
pub async fn list_audit_logs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Query(page): Query<Page>,
) -> Result<Json<PageResult<AuditLogEntry>>, Response> {
    require(&services, &ctx, Scope::ADMIN)?;
    services
        .audit
        .list(ctx.tenant_id, page)
        .map(Json)
        .map_err(errors::store_error_to_response)
}
