//! HTTP application wiring.
//!
//! - `services.rs`: repositories, providers, queue and hub construction
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request bodies and their mapping onto service inputs
//! - `errors.rs`: the shared `{"error","message"}` response shape

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router. `/health` is public; everything under `/v1`
/// requires an API key.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let protected = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            services,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/v1", protected)
        .layer(ServiceBuilder::new())
}
