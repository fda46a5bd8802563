//! Server-sent event subscriptions over the fan-out hubs.
//!
//! Each stream starts with a snapshot, then forwards live events. The hub
//! subscription is taken before the snapshot is read so no update falls in
//! between. A slow client loses events (the hub drops on a full buffer), never
//! blocks the publisher; the job record stays the source of truth.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension,
    extract::Path,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde::Serialize;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use genflow_auth::{AuthContext, Scope};
use genflow_core::JobId;
use genflow_events::JobUpdate;
use genflow_jobs::TenantUsage;

use super::parse_id;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::middleware::require;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

fn sse_event<T: Serialize>(
    name: &'static str,
    payload: &T,
) -> Option<Result<SseEvent, Infallible>> {
    match SseEvent::default().event(name).json_data(payload) {
        Ok(event) => Some(Ok(event)),
        Err(e) => {
            debug!(error = %e, "dropping unserializable sse payload");
            None
        }
    }
}

fn into_sse<S>(stream: S) -> Response
where
    S: Stream<Item = Result<SseEvent, Infallible>> + Send + 'static,
{
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
        .into_response()
}

fn job_stream<S>(snapshot: Vec<JobUpdate>, live: S) -> Response
where
    S: Stream<Item = JobUpdate> + Send + 'static,
{
    let events = tokio_stream::iter(snapshot)
        .chain(live)
        .filter_map(|update| sse_event("job", &update));
    into_sse(events)
}

/// GET /v1/jobs/:id/events
pub async fn job_events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require(&services, &ctx, Scope::READ)?;
    let id: JobId = parse_id(&id, "job")?;

    let live = services.fanout.subscribe_job(id);
    let job = services
        .jobs
        .get(ctx.tenant_id, id)
        .map_err(errors::store_error_to_response)?;

    Ok(job_stream(vec![JobUpdate::from(&job)], live))
}

/// GET /v1/stream
///
/// Every job update for the caller's tenant.
pub async fn tenant_events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Response, Response> {
    require(&services, &ctx, Scope::READ)?;
    let live = services.fanout.subscribe_tenant(ctx.tenant_id);
    Ok(job_stream(Vec::new(), live))
}

/// GET /v1/usage/stream
///
/// The tenant's usage view, refreshed on each finished job.
pub async fn usage_events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Response, Response> {
    require(&services, &ctx, Scope::READ)?;
    let live = services.fanout.subscribe_usage(ctx.tenant_id);
    let current: TenantUsage = services
        .execution
        .usage_summary(ctx.tenant_id)
        .map_err(errors::execution_error_to_response)?;

    let events = tokio_stream::once(current)
        .chain(live)
        .filter_map(|usage| sse_event("usage", &usage));
    Ok(into_sse(events))
}
