//! Narrow seams for running agents without depending on the concrete supervisor.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::supervisor::RunResult;

/// One request to run a stored agent on behalf of a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub agent_id: String,
    /// User id the run is performed for. Must own the agent.
    pub caller: String,
    /// Explicit instruction. `None`, empty, or equal to the agent's prompt means an unattended run.
    pub instruction: Option<String>,
    /// Extra material for unattended runs, e.g. the event that fired a trigger.
    pub context: Option<String>,
    /// Delegation nesting level; top-level runs are 0.
    pub depth: usize,
}

impl RunRequest {
    pub fn new(agent_id: impl Into<String>, caller: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            caller: caller.into(),
            instruction: None,
            context: None,
            depth: 0,
        }
    }

    pub fn with_instruction(mut self, instruction: Option<String>) -> Self {
        self.instruction = instruction;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }
}

/// Anything that can run a stored agent by id. Implemented by the Supervisor.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn run_agent(&self, request: RunRequest) -> RunResult;
}

/// A single agent bound to a caller, ready to take an instruction.
#[async_trait]
pub trait RunnableAgent: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, instruction: Option<String>) -> RunResult;
}

/// [`RunnableAgent`] backed by an [`AgentDirectory`].
pub struct SupervisedAgent {
    id: String,
    caller: String,
    directory: Arc<dyn AgentDirectory>,
}

impl SupervisedAgent {
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        id: impl Into<String>,
        caller: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            caller: caller.into(),
            directory,
        }
    }
}

#[async_trait]
impl RunnableAgent for SupervisedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, instruction: Option<String>) -> RunResult {
        self.directory
            .run_agent(RunRequest::new(&self.id, &self.caller).with_instruction(instruction))
            .await
    }
}
