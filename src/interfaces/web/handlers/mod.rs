pub mod agents;
pub mod delegate;
pub mod events;
pub mod webhooks;

use axum::{
    Json,
    http::{HeaderMap, StatusCode},
};
use serde_json::Value;

use crate::error::{ManageError, StoreError};

pub(crate) const USER_HEADER: &str = "x-user-id";

pub(crate) type ApiResponse = (StatusCode, Json<Value>);

pub(crate) fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": message.into() })),
    )
}

/// Caller identity from the `x-user-id` header, if any.
pub(crate) fn caller_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn require_caller(headers: &HeaderMap) -> Result<String, ApiResponse> {
    caller_from(headers).ok_or_else(|| {
        error_response(
            StatusCode::UNAUTHORIZED,
            format!("missing {} header", USER_HEADER),
        )
    })
}

pub(crate) fn store_error(e: StoreError) -> ApiResponse {
    let status = match &e {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::DuplicateWebhookPath(_) => StatusCode::CONFLICT,
        StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

pub(crate) fn manage_error(e: ManageError) -> ApiResponse {
    match e {
        ManageError::Unauthorized(_) => error_response(StatusCode::FORBIDDEN, e.to_string()),
        ManageError::Invalid(_) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        ManageError::Store(inner) => store_error(inner),
        ManageError::Other(inner) => {
            tracing::error!("Management operation failed: {:#}", inner);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, inner.to_string())
        }
    }
}
