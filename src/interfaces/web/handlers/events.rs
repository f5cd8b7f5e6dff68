use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use tracing::info;

use super::super::AppState;
use super::{ApiResponse, caller_from, error_response, ok, store_error};
use crate::core::agent::TriggerKind;
use crate::core::triggers::{Event, TriggerMatch};

/// Integration events from connected services. A caller header narrows matches to that owner.
pub async fn event_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut event): Json<Event>,
) -> ApiResponse {
    if event.kind == TriggerKind::Webhook {
        return error_response(
            StatusCode::BAD_REQUEST,
            "webhook events must be delivered to /api/webhooks/{path}",
        );
    }
    if let Some(caller) = caller_from(&headers) {
        event.user_id = Some(caller);
    }

    match state
        .runtime
        .triggers
        .dispatch(&event, state.runtime.directory())
        .await
    {
        Ok(runs) => {
            let matched: Vec<TriggerMatch> = runs.into_iter().map(|run| run.matched).collect();
            info!(
                "Event {}.{} started {} run(s)",
                event.source,
                event.event,
                matched.len()
            );
            ok(serde_json::json!({ "success": true, "matched": matched }))
        }
        Err(e) => store_error(e),
    }
}
