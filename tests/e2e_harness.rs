#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tower::util::ServiceExt;

use agentloom::config::AppConfig;
use agentloom::core::agent::{AgentRecord, AgentStore, MemoryStore};
use agentloom::core::llm::OpenAiCompatProvider;
use agentloom::core::runtime::Runtime;
use agentloom::core::scheduler::{JobQueue, MemoryJobQueue};
use agentloom::core::tools::{Tool, ToolContext, default_registry};
use agentloom::interfaces::web::{AppState, build_api_router};

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub const FALLBACK_REPLY: &str = "Nothing left to do.";

/// One scripted answer from the mock model endpoint.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Status(u16),
}

impl MockReply {
    pub fn text(s: &str) -> Self {
        MockReply::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MockChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct MockOpenAiRequest {
    messages: Vec<MockChatMessage>,
}

#[derive(Clone)]
struct MockServerState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    fallback: Arc<Mutex<String>>,
    traces: Arc<Mutex<Vec<Vec<MockChatMessage>>>>,
}

async fn mock_chat_completion(
    State(state): State<MockServerState>,
    Json(payload): Json<MockOpenAiRequest>,
) -> Response {
    state
        .traces
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(payload.messages);

    let next = state
        .replies
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .pop_front();
    let content = match next {
        Some(MockReply::Status(code)) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, "mock upstream failure").into_response();
        }
        Some(MockReply::Text(text)) => text,
        None => state
            .fallback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone(),
    };
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
    .into_response()
}

/// Chat-completions endpoint on a loopback port, replaying scripted replies.
pub struct MockLlmServer {
    pub port: u16,
    state: MockServerState,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockLlmServer {
    pub async fn start(replies: Vec<MockReply>) -> TestResult<Self> {
        let state = MockServerState {
            replies: Arc::new(Mutex::new(replies.into())),
            fallback: Arc::new(Mutex::new(FALLBACK_REPLY.to_string())),
            traces: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(mock_chat_completion))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            port,
            state,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/v1/chat/completions", self.port)
    }

    pub fn set_fallback(&self, reply: &str) {
        *self.state.fallback.lock().unwrap() = reply.to_string();
    }

    pub fn request_count(&self) -> usize {
        self.state.traces.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Vec<MockChatMessage>> {
        self.state.traces.lock().unwrap().clone()
    }
}

impl Drop for MockLlmServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Tool that returns a fixed output and remembers every argument object.
pub struct CapturingTool {
    name: String,
    output: Value,
    calls: Mutex<Vec<Value>>,
}

impl CapturingTool {
    pub fn new(name: &str, output: Value) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            output,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for CapturingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Captures its arguments"
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<Value> {
        self.calls.lock().unwrap().push(args);
        Ok(self.output.clone())
    }
}

/// A full runtime over in-memory collaborators and a mock model endpoint.
pub struct Harness {
    pub llm: MockLlmServer,
    pub runtime: Arc<Runtime>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub issues: Arc<CapturingTool>,
    pub mailer: Arc<CapturingTool>,
    log_tx: broadcast::Sender<String>,
}

impl Harness {
    /// `None` when the sandbox forbids binding a loopback socket.
    pub async fn start(replies: Vec<MockReply>) -> TestResult<Option<Self>> {
        let llm = match MockLlmServer::start(replies).await {
            Ok(server) => server,
            Err(err) if err.to_string().contains("Operation not permitted") => {
                eprintln!("Skipping e2e test: socket bind not permitted");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let mut config = AppConfig::default();
        config.llm.base_url = llm.base_url();
        config.llm.default_model = "mock-model-v1".to_string();
        config.runner.backoff_base_ms = 5;
        config.delegation.default_timeout_ms = 5_000;

        let provider = OpenAiCompatProvider::from_config(&config.llm)?;
        let issues = CapturingTool::new(
            "github_issues",
            json!({ "open": [{ "number": 7, "title": "Crash on start" }] }),
        );
        let mailer = CapturingTool::new("send_email", json!({ "sent": true }));
        let mut registry = default_registry()?;
        registry.register(issues.clone());
        registry.register(mailer.clone());

        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let dyn_store: Arc<dyn AgentStore> = store.clone();
        let dyn_queue: Arc<dyn JobQueue> = queue.clone();
        let runtime = Runtime::assemble(
            config,
            dyn_store,
            dyn_queue,
            Arc::new(provider),
            Arc::new(registry),
        );
        let (log_tx, _) = broadcast::channel(64);

        Ok(Some(Self {
            llm,
            runtime: Arc::new(runtime),
            store,
            queue,
            issues,
            mailer,
            log_tx,
        }))
    }

    pub fn router(&self) -> Router {
        build_api_router(AppState::new(self.runtime.clone(), self.log_tx.clone()))
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> TestResult<(StatusCode, Value)> {
        let mut req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(user) = user {
            req = req.header("x-user-id", user);
        }
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json)?),
            None => Body::empty(),
        };
        let resp = self.router().oneshot(req.body(body)?).await?;
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await?;
        let json = serde_json::from_slice(&bytes).unwrap_or(json!({}));
        Ok((status, json))
    }

    /// Create an agent over HTTP and return its id.
    pub async fn create_agent(&self, user: &str, body: Value) -> TestResult<String> {
        let (status, json) = self
            .request(Method::POST, "/api/agents", Some(user), Some(body))
            .await?;
        if status != StatusCode::CREATED {
            return Err(format!("create failed ({}): {}", status, json).into());
        }
        json["agent"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| "missing agent id".into())
    }

    pub async fn agent(&self, id: &str) -> TestResult<AgentRecord> {
        self.store
            .get_agent(id)
            .await?
            .ok_or_else(|| format!("agent {} not found", id).into())
    }

    /// Poll until the agent has `count` log entries; background runs finish on their own time.
    pub async fn wait_for_log(&self, id: &str, count: usize) -> TestResult<AgentRecord> {
        for _ in 0..200 {
            let agent = self.agent(id).await?;
            if agent.log.len() >= count {
                return Ok(agent);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Err(format!("agent {} never reached {} log entries", id, count).into())
    }
}
