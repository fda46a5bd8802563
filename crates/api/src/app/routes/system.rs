use std::sync::Arc;

use axum::{Extension, Json, http::StatusCode, response::Response};

use genflow_auth::{AuthContext, Scope};

use crate::app::services::AppServices;
use crate::middleware::require;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<AuthContext>, Response> {
    require(&services, &ctx, Scope::READ)?;
    Ok(Json(ctx))
}
