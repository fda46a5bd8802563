use axum::{
    Router,
    routing::{get, post},
};

pub mod admin;
pub mod completions;
pub mod jobs;
pub mod providers;
pub mod streams;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints, mounted under `/v1`.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/completions", post(completions::complete))
        .route("/completions/stream", post(completions::stream))
        .route("/jobs", post(jobs::submit).get(jobs::list))
        .route("/jobs/:id", get(jobs::get))
        .route("/jobs/:id/events", get(streams::job_events))
        .route("/stream", get(streams::tenant_events))
        .route("/usage", get(jobs::usage))
        .route("/usage/stream", get(streams::usage_events))
        .route("/providers", get(providers::list))
        .route("/providers/:name/models", get(providers::models))
        .nest("/admin", admin::router())
}

/// Path ids are parsed by hand so malformed ids get the JSON error body.
pub(crate) fn parse_id<T: std::str::FromStr>(
    raw: &str,
    what: &str,
) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| crate::app::errors::bad_request(format!("invalid {what} id '{raw}'")))
}
