//! Fakes shared by the core unit tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::RunnerConfig;
use crate::core::agent::{AgentDirectory, RunMode, RunRequest};
use crate::core::brain::DecisionLoop;
use crate::core::llm::{ChatMessage, LlmManager, LlmProvider};
use crate::core::supervisor::{RunOutcome, RunResult};
use crate::core::tools::{Tool, ToolContext, ToolDispatcher, ToolRegistry};

/// Replays queued replies in order, then repeats `fallback` forever.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: String,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_fallback(replies, "Nothing left to do.")
    }

    pub fn with_fallback<I, S>(replies: I, fallback: impl Into<String>) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            fallback: fallback.into(),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Queue a failing model call.
    pub fn push_error(&self, message: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Err(message.into()));
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(reply.into()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Message history sent on call `index` (0-based).
    pub fn call(&self, index: usize) -> Vec<ChatMessage> {
        self.calls.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _model_id: &str, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Returns a fixed output and remembers the arguments of every call.
pub struct RecordingTool {
    name: String,
    output: Value,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
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
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Test tool"
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        self.calls.lock().unwrap().push(args);
        Ok(self.output.clone())
    }
}

pub fn registry(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}

pub fn decision_loop(model: Arc<ScriptedModel>, tools: Vec<Arc<dyn Tool>>) -> DecisionLoop {
    decision_loop_with(model, tools, RunnerConfig::default())
}

pub fn decision_loop_with(
    model: Arc<ScriptedModel>,
    tools: Vec<Arc<dyn Tool>>,
    runner: RunnerConfig,
) -> DecisionLoop {
    DecisionLoop::new(
        LlmManager::new(model, "test-model"),
        ToolDispatcher::new(registry(tools)),
        runner,
    )
}

pub fn reply(agent_id: &str, text: &str) -> RunResult {
    RunResult {
        agent_id: agent_id.to_string(),
        mode: RunMode::Directed,
        attempts: 1,
        outcome: RunOutcome::Reply {
            text: text.to_string(),
            acted: true,
        },
        steps: Vec::new(),
        schedule: None,
    }
}

/// Answers every run with a canned reply and records the requests.
#[derive(Default)]
pub struct RecordingDirectory {
    seen: Mutex<Vec<RunRequest>>,
}

impl RecordingDirectory {
    pub fn requests(&self) -> Vec<RunRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentDirectory for RecordingDirectory {
    async fn run_agent(&self, request: RunRequest) -> RunResult {
        self.seen.lock().unwrap().push(request.clone());
        reply(&request.agent_id, "done")
    }
}
