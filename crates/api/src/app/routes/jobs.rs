use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
    response::Response,
};

use genflow_auth::{AuthContext, Scope};
use genflow_core::JobId;
use genflow_infra::Submission;
use genflow_infra::store::{Page, PageResult};
use genflow_jobs::{Job, TenantUsage};

use super::parse_id;
use crate::app::dto::SubmitJobBody;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::middleware::require;

/// POST /v1/jobs
pub async fn submit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<SubmitJobBody>,
) -> Result<(StatusCode, Json<Submission>), Response> {
    require(&services, &ctx, Scope::WRITE)?;
    let submission = services
        .submitter
        .submit(ctx.tenant_id, body.into())
        .await
        .map_err(errors::submit_error_to_response)?;
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

/// GET /v1/jobs?limit=&offset=
pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Query(page): Query<Page>,
) -> Result<Json<PageResult<Job>>, Response> {
    require(&services, &ctx, Scope::READ)?;
    services
        .jobs
        .list(ctx.tenant_id, page)
        .map(Json)
        .map_err(errors::store_error_to_response)
}

/// GET /v1/jobs/:id
pub async fn get(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<Job>, Response> {
    require(&services, &ctx, Scope::READ)?;
    let id: JobId = parse_id(&id, "job")?;
    services
        .jobs
        .get(ctx.tenant_id, id)
        .map(Json)
        .map_err(errors::store_error_to_response)
}

/// GET /v1/usage
pub async fn usage(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<TenantUsage>, Response> {
    require(&services, &ctx, Scope::READ)?;
    services
        .execution
        .usage_summary(ctx.tenant_id)
        .map(Json)
        .map_err(errors::execution_error_to_response)
}
