use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use genflow_auth::{AuthContext, RequestMeta, Scope};

use crate::app::errors;
use crate::app::services::AppServices;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolve the request's API key into an [`AuthContext`] extension.
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let meta = RequestMeta {
        ip: client_ip(req.headers()),
        user_agent: header_str(req.headers(), header::USER_AGENT.as_str()).map(str::to_string),
        path: Some(req.uri().path().to_string()),
    };
    let raw = extract_key(req.headers());

    let ctx = services
        .resolver
        .resolve(raw, &meta, Utc::now())
        .map_err(errors::auth_error_to_response)?;

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Scope guard for handlers. Violations are audited by the resolver.
pub fn require(services: &AppServices, ctx: &AuthContext, scope: Scope) -> Result<(), Response> {
    services
        .resolver
        .authorize(ctx, &scope, Utc::now())
        .map_err(errors::auth_error_to_response)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// `Authorization: Bearer <key>` first, then `X-API-Key`.
fn extract_key(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .or_else(|| header_str(headers, API_KEY_HEADER))
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_string)
}
