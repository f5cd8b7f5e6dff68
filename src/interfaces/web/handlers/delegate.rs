use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use super::super::AppState;
use super::{ApiResponse, caller_from, error_response, ok};
use crate::core::delegation::DelegationRequest;

pub async fn delegate_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<DelegationRequest>,
) -> ApiResponse {
    if let Some(caller) = caller_from(&headers) {
        request.user_id = caller;
    }
    if request.user_id.trim().is_empty() {
        return error_response(StatusCode::UNAUTHORIZED, "userId is required");
    }
    if request.instruction.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "instruction is required");
    }

    let report = state.runtime.delegation.delegate(request).await;
    match serde_json::to_value(&report) {
        Ok(body) => ok(body),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
