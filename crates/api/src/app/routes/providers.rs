use std::sync::Arc;

use axum::{Extension, Json, extract::Path, response::Response};
use serde::Serialize;

use genflow_auth::{AuthContext, Scope};
use genflow_providers::ProviderInfo;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::middleware::require;

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub provider: String,
    pub models: Vec<String>,
}

/// GET /v1/providers
pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<ProviderInfo>>, Response> {
    require(&services, &ctx, Scope::READ)?;
    Ok(Json(services.registry.describe()))
}

/// GET /v1/providers/:name/models
pub async fn models(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(name): Path<String>,
) -> Result<Json<ModelList>, Response> {
    require(&services, &ctx, Scope::READ)?;
    let provider = services
        .registry
        .get(&name)
        .map_err(|e| errors::not_found(e.to_string()))?;
    let models = provider
        .require_model_lister()
        .map_err(errors::provider_error_to_response)?
        .list_models()
        .await
        .map_err(errors::provider_error_to_response)?;

    Ok(Json(ModelList {
        provider: provider.name().to_string(),
        models,
    }))
}
