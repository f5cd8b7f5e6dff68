mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Json,
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::core::lifecycle::LifecycleComponent;
use crate::core::runtime::Runtime;

pub use router::build_api_router;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub log_tx: broadcast::Sender<String>,
}

impl AppState {
    pub fn new(runtime: Arc<Runtime>, log_tx: broadcast::Sender<String>) -> Self {
        Self { runtime, log_tx }
    }
}

/// Serves the HTTP API on the configured host and port.
pub struct ApiServer {
    state: AppState,
    server: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            server: None,
        }
    }
}

async fn health_endpoint() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let api = &self.state.runtime.config.api;
        let addr = format!("{}:{}", api.host, api.port);
        // Bind here so a taken port fails startup instead of a background task.
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let app = router::build_api_router(self.state.clone());

        self.server = Some(tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        if let Some(server) = self.server.take() {
            server.abort();
        }
        Ok(())
    }
}
