use std::sync::Arc;

use axum::{
    Extension, Json,
    body::{Body, Bytes},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use genflow_auth::{AuthContext, Scope};
use genflow_core::JobId;
use genflow_infra::Completion;

use crate::app::dto::CompletionBody;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::middleware::require;

/// One NDJSON line of a streamed completion.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamEvent {
    Chunk {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        job_id: JobId,
        tokens_in: u64,
        tokens_out: u64,
        cost: f64,
        provider: String,
        model: String,
    },
    Error {
        error: String,
    },
}

fn line(event: &StreamEvent) -> Result<Bytes, serde_json::Error> {
    let mut buf = serde_json::to_vec(event)?;
    buf.push(b'\n');
    Ok(Bytes::from(buf))
}

/// POST /v1/completions
pub async fn complete(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CompletionBody>,
) -> Result<Json<Completion>, Response> {
    require(&services, &ctx, Scope::WRITE)?;
    let request = body.into_request().map_err(errors::provider_error_to_response)?;

    let completion = services
        .execution
        .complete(ctx.tenant_id, request)
        .await
        .map_err(errors::execution_error_to_response)?;
    Ok(Json(completion))
}

/// POST /v1/completions/stream
///
/// Newline-delimited JSON: zero or more `chunk` lines, then exactly one
/// `done` or `error` line. The provider call runs in its own task, so a client
/// that disconnects does not stop it from finishing and recording usage.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CompletionBody>,
) -> Result<Response, Response> {
    require(&services, &ctx, Scope::WRITE)?;
    if !body.has_input() {
        return Err(errors::bad_request("prompt or messages is required"));
    }
    let request = body.into_request().map_err(errors::provider_error_to_response)?;

    let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, serde_json::Error>>();
    let tenant_id = ctx.tenant_id;

    tokio::spawn(async move {
        let chunks = tx.clone();
        let mut sink = move |chunk: &str| {
            let _ = chunks.send(line(&StreamEvent::Chunk {
                content: chunk.to_string(),
            }));
        };

        let last = match services.execution.stream(tenant_id, request, &mut sink).await {
            Ok(done) => StreamEvent::Done {
                job_id: done.job_id,
                tokens_in: done.tokens_in,
                tokens_out: done.tokens_out,
                cost: done.cost,
                provider: done.provider,
                model: done.model,
            },
            Err(e) => {
                debug!(tenant_id = %tenant_id, error = %e, "streamed completion failed");
                StreamEvent::Error { error: e.to_string() }
            }
        };
        let _ = tx.send(line(&last));
    });

    let body = Body::from_stream(UnboundedReceiverStream::new(rx));
    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response())
}
