use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use tracing::info;

use super::super::AppState;
use super::{ApiResponse, error_response, manage_error, ok, require_caller};
use crate::core::agent::{AgentPatch, NewAgent, NewTrigger, RunRequest, ScheduleUpdate, Trigger};

macro_rules! caller {
    ($headers:expr) => {
        match require_caller(&$headers) {
            Ok(caller) => caller,
            Err(resp) => return resp,
        }
    };
}

/// Secrets are write-only over the API.
fn redacted(mut trigger: Trigger) -> Trigger {
    trigger.config.secret = None;
    trigger
}

pub async fn list_agents(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let caller = caller!(headers);
    match state.runtime.manager.list_agents(&caller).await {
        Ok(agents) => ok(serde_json::json!({ "success": true, "agents": agents })),
        Err(e) => manage_error(e),
    }
}

pub async fn create_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewAgent>,
) -> ApiResponse {
    let caller = caller!(headers);
    match state.runtime.manager.create_agent(&caller, payload).await {
        Ok(agent) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "success": true, "agent": agent })),
        ),
        Err(e) => manage_error(e),
    }
}

pub async fn get_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResponse {
    let caller = caller!(headers);
    match state.runtime.manager.get_agent(&caller, &agent_id).await {
        Ok(agent) => ok(serde_json::json!({ "success": true, "agent": agent })),
        Err(e) => manage_error(e),
    }
}

pub async fn update_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(patch): Json<AgentPatch>,
) -> ApiResponse {
    let caller = caller!(headers);
    match state.runtime.manager.update_agent(&caller, &agent_id, patch).await {
        Ok(agent) => ok(serde_json::json!({ "success": true, "agent": agent })),
        Err(e) => manage_error(e),
    }
}

pub async fn delete_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResponse {
    let caller = caller!(headers);
    match state.runtime.manager.delete_agent(&caller, &agent_id).await {
        Ok(deleted) => ok(serde_json::json!({ "success": true, "deleted": deleted })),
        Err(e) => manage_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RunBody {
    #[serde(default)]
    input: Option<String>,
}

/// Runs the agent in the foreground. An empty body or no `input` means an unattended run.
pub async fn run_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResponse {
    let caller = caller!(headers);
    let parsed = if body.trim().is_empty() {
        RunBody::default()
    } else {
        match serde_json::from_str::<RunBody>(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("invalid body: {}", e));
            }
        }
    };

    info!(agent = %agent_id, "Run requested over HTTP");
    let request = RunRequest::new(&agent_id, &caller).with_instruction(parsed.input);
    let result = state.runtime.supervisor.run(request).await;
    ok(serde_json::json!({ "success": result.is_success(), "result": result }))
}

pub async fn set_schedule(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<ScheduleUpdate>,
) -> ApiResponse {
    let caller = caller!(headers);
    match state
        .runtime
        .manager
        .set_schedule(&caller, &agent_id, update)
        .await
    {
        Ok(agent) => ok(serde_json::json!({ "success": true, "schedule": agent.schedule })),
        Err(e) => manage_error(e),
    }
}

pub async fn list_schedules(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResponse {
    let caller = caller!(headers);
    match state.runtime.manager.list_schedules(&caller, &agent_id).await {
        Ok(entries) => ok(serde_json::json!({ "success": true, "schedules": entries })),
        Err(e) => manage_error(e),
    }
}

pub async fn list_triggers(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResponse {
    let caller = caller!(headers);
    match state.runtime.manager.list_triggers(&caller, &agent_id).await {
        Ok(triggers) => {
            let triggers: Vec<Trigger> = triggers.into_iter().map(redacted).collect();
            ok(serde_json::json!({ "success": true, "triggers": triggers }))
        }
        Err(e) => manage_error(e),
    }
}

pub async fn add_trigger(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new): Json<NewTrigger>,
) -> ApiResponse {
    let caller = caller!(headers);
    match state.runtime.manager.add_trigger(&caller, &agent_id, new).await {
        Ok(trigger) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "success": true, "trigger": redacted(trigger) })),
        ),
        Err(e) => manage_error(e),
    }
}
