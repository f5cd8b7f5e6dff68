use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::handlers::{agents, delegate, events, webhooks};
use super::{AppState, health_endpoint, sse_logs_endpoint};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    // External senders authenticate webhooks with HMAC signatures, not the caller header.
    let public_routes = Router::new()
        .route("/api/health", get(health_endpoint))
        .route("/api/webhooks/{*path}", post(webhooks::webhook_endpoint))
        .layer(middleware::from_fn(security_headers))
        .with_state(state.clone());

    let api_port = state.runtime.config.api.port;
    let caller_routes = Router::new()
        .route(
            "/api/agents",
            get(agents::list_agents).post(agents::create_agent),
        )
        .route(
            "/api/agents/{id}",
            get(agents::get_agent)
                .put(agents::update_agent)
                .delete(agents::delete_agent),
        )
        .route("/api/agents/{id}/run", post(agents::run_agent))
        .route("/api/agents/{id}/schedule", post(agents::set_schedule))
        .route("/api/agents/{id}/schedules", get(agents::list_schedules))
        .route(
            "/api/agents/{id}/triggers",
            get(agents::list_triggers).post(agents::add_trigger),
        )
        .route("/api/events", post(events::event_endpoint))
        .route("/api/delegate", post(delegate::delegate_endpoint))
        .route("/api/logs", get(sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(api_port))
        .with_state(state);

    public_routes.merge(caller_routes)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
