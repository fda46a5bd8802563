use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use genflow_auth::AuthError;
use genflow_infra::store::StoreError;
use genflow_infra::{ExecutionError, SubmitError};
use genflow_providers::ProviderError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn bad_request(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

pub fn not_found(message: impl Into<String>) -> Response {
    json_error(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn auth_error_to_response(err: AuthError) -> Response {
    match err {
        AuthError::MissingCredential | AuthError::InvalidCredential => {
            json_error(StatusCode::UNAUTHORIZED, "unauthorized", err.to_string())
        }
        AuthError::InsufficientScope { .. } => {
            json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
        }
        AuthError::InvalidScope(_) => bad_request(err.to_string()),
        AuthError::Store(msg) => {
            error!(error = %msg, "credential store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "internal error")
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> Response {
    match err {
        StoreError::NotFound { .. } => not_found(err.to_string()),
        StoreError::AlreadyExists { .. } | StoreError::Conflict(_) => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        StoreError::Storage(msg) => {
            error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "internal error")
        }
    }
}

pub fn provider_error_to_response(err: ProviderError) -> Response {
    let status = match &err {
        ProviderError::NotFound(_) | ProviderError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ProviderError::NoneResolved | ProviderError::Unavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ProviderError::CapabilityNotSupported { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ProviderError::Upstream { .. } => StatusCode::BAD_GATEWAY,
    };
    json_error(status, err.code(), err.to_string())
}

pub fn execution_error_to_response(err: ExecutionError) -> Response {
    match err {
        ExecutionError::Validation(msg) => bad_request(msg),
        ExecutionError::JobNotFound(id) => not_found(format!("job not found: {id}")),
        ExecutionError::Provider(e) => provider_error_to_response(e),
        ExecutionError::Store(e) => store_error_to_response(e),
        ExecutionError::Transition(e) => {
            json_error(StatusCode::CONFLICT, "invalid_transition", e.to_string())
        }
    }
}

pub fn submit_error_to_response(err: SubmitError) -> Response {
    match err {
        SubmitError::Validation(e) => bad_request(e.to_string()),
        SubmitError::Store(e) => store_error_to_response(e),
        SubmitError::Enqueue { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", err.to_string())
        }
    }
}
