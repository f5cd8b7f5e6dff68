//! Runs one agent end-to-end: mode selection, retry, logging, self-rescheduling.

pub mod events;
pub mod retry;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::RunnerConfig;
use crate::core::agent::manager::validate_schedule;
use crate::core::agent::{
    AgentDirectory, AgentRecord, AgentStore, LogEntry, LogStatus, RunMode, RunRequest,
    ScheduleSpec, StepRecord,
};
use crate::core::brain::decision::{self, Decision, ToolDecision};
use crate::core::brain::history::{summarize_result, truncate_chars};
use crate::core::brain::{DecisionLoop, LoopOutcome, LoopReport, LoopRequest};
use crate::core::scheduler::{self, JobData, JobHandler, JobQueue};
use crate::core::tools::ToolContext;
use crate::error::RunErrorKind;

use events::{RunEvent, RunEvents};
use retry::{RetryPolicy, run_with_retry};

const LOG_SUMMARY_CHARS: usize = 1000;

/// Result of carrying out a decided action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub ok: bool,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Plain-language reply. `acted` is false when the loop ran out of turns.
    Reply { text: String, acted: bool },
    /// Directed run: the reply, the decision taken from it, and what executing it produced.
    Decided {
        reply: String,
        decision: Decision,
        action: ActionOutcome,
    },
    Failed {
        error: String,
        error_kind: RunErrorKind,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub agent_id: String,
    pub mode: RunMode,
    pub attempts: u32,
    pub outcome: RunOutcome,
    /// Actions executed during the run, kept even when the run failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
    /// Schedule the agent asked for in its reply, already applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
}

impl RunResult {
    pub fn failed(
        agent_id: impl Into<String>,
        mode: RunMode,
        attempts: u32,
        error: impl Into<String>,
        error_kind: RunErrorKind,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            mode,
            attempts,
            outcome: RunOutcome::Failed {
                error: error.into(),
                error_kind,
            },
            steps: Vec::new(),
            schedule: None,
        }
    }

    pub fn is_success(&self) -> bool {
        match &self.outcome {
            RunOutcome::Reply { .. } => true,
            RunOutcome::Decided { action, .. } => action.ok,
            RunOutcome::Failed { .. } => false,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Failed { error, .. } => Some(error),
            RunOutcome::Decided { action, .. } if !action.ok => Some(&action.summary),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<RunErrorKind> {
        match &self.outcome {
            RunOutcome::Failed { error_kind, .. } => Some(*error_kind),
            _ => None,
        }
    }

    /// Human-readable one-liner of the outcome.
    pub fn summary(&self) -> String {
        match &self.outcome {
            RunOutcome::Reply { text, acted: true } => text.clone(),
            RunOutcome::Reply { text, acted: false } => {
                format!("[did not act] {}", text)
            }
            RunOutcome::Decided { reply, action, .. } => {
                format!("{}\n{}", reply.trim(), action.summary)
            }
            RunOutcome::Failed { error, .. } => format!("Error: {}", error),
        }
    }
}

/// Unattended when there is no instruction or it just repeats the agent's own prompt.
pub fn mode_for(agent: &AgentRecord, instruction: Option<&str>) -> RunMode {
    match instruction.map(str::trim) {
        None => RunMode::Unattended,
        Some(text) if text.is_empty() || text == agent.system_prompt.trim() => RunMode::Unattended,
        Some(_) => RunMode::Directed,
    }
}

pub struct Supervisor {
    store: Arc<dyn AgentStore>,
    brain: DecisionLoop,
    queue: Arc<dyn JobQueue>,
    retry: RetryPolicy,
    result_char_limit: usize,
    max_depth: usize,
    events: RunEvents,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn AgentStore>,
        brain: DecisionLoop,
        queue: Arc<dyn JobQueue>,
        runner: &RunnerConfig,
    ) -> Self {
        Self {
            store,
            brain,
            queue,
            retry: RetryPolicy::from_config(runner),
            result_char_limit: runner.result_char_limit,
            max_depth: runner.max_delegation_depth,
            events: RunEvents::default(),
        }
    }

    pub fn events(&self) -> &RunEvents {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn AgentStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Run an agent. Never returns an error: failures are folded into the result.
    pub async fn run(&self, request: RunRequest) -> RunResult {
        let agent = match self.store.get_agent(&request.agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                return RunResult::failed(
                    &request.agent_id,
                    RunMode::Unattended,
                    0,
                    format!("agent '{}' not found", request.agent_id),
                    RunErrorKind::Fatal,
                );
            }
            Err(e) => {
                return RunResult::failed(
                    &request.agent_id,
                    RunMode::Unattended,
                    0,
                    e.to_string(),
                    RunErrorKind::Fatal,
                );
            }
        };
        let mode = mode_for(&agent, request.instruction.as_deref());

        if !agent.is_owned_by(&request.caller) {
            warn!(agent = %agent.id, "Run refused: caller {} does not own the agent", request.caller);
            return RunResult::failed(
                &agent.id,
                mode,
                0,
                format!("agent '{}' is not owned by the caller", agent.id),
                RunErrorKind::Unauthorized,
            );
        }
        if request.depth > self.max_depth {
            return RunResult::failed(
                &agent.id,
                mode,
                0,
                format!("delegation depth limit ({}) exceeded", self.max_depth),
                RunErrorKind::Fatal,
            );
        }

        info!(agent = %agent.id, "Run started ({:?}, depth {})", mode, request.depth);
        self.events.emit(RunEvent::Started {
            agent_id: agent.id.clone(),
            mode,
        });

        let retried = run_with_retry(
            &self.retry,
            |_attempt| {
                self.brain.run(
                    LoopRequest {
                        agent: &agent,
                        mode,
                        instruction: request.instruction.as_deref(),
                        context: request.context.as_deref(),
                        caller: &request.caller,
                        depth: request.depth,
                    },
                    self,
                )
            },
            |attempt, delay, err| {
                warn!(agent = %agent.id, "Attempt {} failed, retrying in {:?}: {}", attempt, delay, err);
                self.events.emit(RunEvent::Retrying {
                    agent_id: agent.id.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error: err.to_string(),
                });
            },
        )
        .await;

        let attempts = retried.attempts;
        let result = match retried.result {
            Ok(report) => self.conclude(&agent, &request, mode, attempts, report).await,
            Err(e) => {
                let kind = retried.kind.unwrap_or(RunErrorKind::Fatal);
                RunResult {
                    agent_id: agent.id.clone(),
                    mode,
                    attempts,
                    outcome: RunOutcome::Failed {
                        error: e.error.to_string(),
                        error_kind: kind,
                    },
                    steps: e.steps,
                    schedule: None,
                }
            }
        };

        self.record(&agent, &result).await;
        if let Some(spec) = &result.schedule
            && let Err(e) = self.apply_schedule(&agent.id, spec.clone()).await
        {
            warn!(agent = %agent.id, "Failed to apply requested schedule: {}", e);
        }

        match &result.outcome {
            RunOutcome::Failed { error, error_kind } => {
                error!(agent = %agent.id, "Run failed after {} attempt(s): {}", attempts, error);
                self.events.emit(RunEvent::Failed {
                    agent_id: agent.id.clone(),
                    attempts,
                    error: error.clone(),
                    kind: *error_kind,
                });
            }
            _ => {
                info!(agent = %agent.id, "Run completed after {} attempt(s)", attempts);
                self.events.emit(RunEvent::Completed {
                    agent_id: agent.id.clone(),
                    attempts,
                });
            }
        }
        result
    }

    async fn conclude(
        &self,
        agent: &AgentRecord,
        request: &RunRequest,
        mode: RunMode,
        attempts: u32,
        report: LoopReport,
    ) -> RunResult {
        let mut steps = report.steps;
        let next_turn = report.turns + 1;
        let (outcome, reply_for_schedule) = match report.outcome {
            LoopOutcome::Final { reply } => (
                RunOutcome::Reply {
                    text: reply.clone(),
                    acted: true,
                },
                Some(reply),
            ),
            LoopOutcome::Exhausted {
                last_reply,
                forced_send,
            } => {
                if let Some(call) = forced_send {
                    steps.push(self.forced_send(agent, call, next_turn).await);
                }
                (
                    RunOutcome::Reply {
                        text: last_reply,
                        acted: false,
                    },
                    None,
                )
            }
            LoopOutcome::Pending { reply, decision } => {
                let action = self.execute(agent, request, &decision).await;
                steps.push(StepRecord {
                    turn: next_turn,
                    decision: decision.clone(),
                    ok: action.ok,
                    summary: action.summary.clone(),
                });
                (
                    RunOutcome::Decided {
                        reply: reply.clone(),
                        decision,
                        action,
                    },
                    Some(reply),
                )
            }
        };

        RunResult {
            agent_id: agent.id.clone(),
            mode,
            attempts,
            outcome,
            steps,
            schedule: reply_for_schedule
                .as_deref()
                .and_then(decision::extract_schedule)
                .filter(|spec| match validate_schedule(spec) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(agent = %agent.id, "Ignoring requested schedule: {}", e);
                        false
                    }
                }),
        }
    }

    /// The single best-effort send owed by the email policy.
    async fn forced_send(&self, agent: &AgentRecord, call: ToolDecision, turn: usize) -> StepRecord {
        info!(agent = %agent.id, "Loop exhausted with email owed, forcing one call to {}", call.target);
        let ctx = ToolContext {
            agent_id: agent.id.clone(),
            user_id: agent.owner_id.clone(),
        };
        let (ok, summary) = match self
            .brain
            .tools()
            .dispatch(&call, &agent.tool_filter(), &ctx)
            .await
        {
            Ok(output) => (true, summarize_result(&output, self.result_char_limit)),
            Err(e) => {
                warn!(agent = %agent.id, "Forced send failed: {}", e);
                (false, e.to_string())
            }
        };
        StepRecord {
            turn,
            decision: Decision::Tool(call),
            ok,
            summary,
        }
    }

    /// Carry out a decision the orchestrator made in directed mode.
    async fn execute(
        &self,
        agent: &AgentRecord,
        request: &RunRequest,
        decision: &Decision,
    ) -> ActionOutcome {
        match decision {
            Decision::Tool(call) => {
                let ctx = ToolContext {
                    agent_id: agent.id.clone(),
                    user_id: request.caller.clone(),
                };
                match self
                    .brain
                    .tools()
                    .dispatch(call, &agent.tool_filter(), &ctx)
                    .await
                {
                    Ok(output) => ActionOutcome {
                        ok: true,
                        summary: summarize_result(&output, self.result_char_limit),
                    },
                    Err(e) => ActionOutcome {
                        ok: false,
                        summary: e.to_string(),
                    },
                }
            }
            Decision::Agent(call) => {
                if request.depth >= self.max_depth {
                    return ActionOutcome {
                        ok: false,
                        summary: format!("delegation depth limit ({}) reached", self.max_depth),
                    };
                }
                if call.target == agent.id {
                    return ActionOutcome {
                        ok: false,
                        summary: "an agent cannot delegate to itself".to_string(),
                    };
                }
                let sub = self
                    .run_agent(
                        RunRequest::new(&call.target, &request.caller)
                            .with_instruction(Some(call.args.input.clone()))
                            .at_depth(request.depth + 1),
                    )
                    .await;
                ActionOutcome {
                    ok: sub.is_success(),
                    summary: truncate_chars(&sub.summary(), self.result_char_limit),
                }
            }
        }
    }

    /// Append the log entry and stamp `last_run_at`, whatever the outcome.
    async fn record(&self, agent: &AgentRecord, result: &RunResult) {
        let now = Utc::now();
        let entry = LogEntry {
            at: now,
            mode: result.mode,
            status: if matches!(result.outcome, RunOutcome::Failed { .. }) {
                LogStatus::Failed
            } else {
                LogStatus::Completed
            },
            attempts: result.attempts,
            summary: truncate_chars(&result.summary(), LOG_SUMMARY_CHARS),
            error: result.error().map(str::to_string),
            steps: result.steps.clone(),
        };
        if let Err(e) = self.store.record_run(&agent.id, entry, now).await {
            error!(agent = %agent.id, "Failed to record run: {}", e);
        }
    }

    async fn apply_schedule(&self, agent_id: &str, spec: ScheduleSpec) -> Result<()> {
        let Some(mut agent) = self.store.get_agent(agent_id).await? else {
            bail!("agent '{}' disappeared before its schedule could be applied", agent_id);
        };
        info!(agent = %agent_id, "Agent requested schedule change: {:?}", spec);
        agent.schedule = spec;
        self.store.update_agent_config(&agent).await?;
        scheduler::schedule_agent(self.queue.as_ref(), &agent).await?;
        Ok(())
    }
}

#[async_trait]
impl AgentDirectory for Supervisor {
    async fn run_agent(&self, request: RunRequest) -> RunResult {
        self.run(request).await
    }
}

/// Queue handler that turns a fired recurring entry into an unattended run.
pub struct SupervisorJobHandler {
    supervisor: Arc<Supervisor>,
}

impl SupervisorJobHandler {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl JobHandler for SupervisorJobHandler {
    async fn handle(&self, job: &JobData) -> Result<()> {
        if self.supervisor.store.get_agent(&job.agent_id).await?.is_none() {
            warn!(agent = %job.agent_id, "Recurring entry fired for a deleted agent, removing it");
            scheduler::unschedule_agent(self.supervisor.queue.as_ref(), &job.agent_id).await?;
            return Ok(());
        }
        let result = self
            .supervisor
            .run(RunRequest::new(&job.agent_id, &job.owner_id))
            .await;
        match result.outcome {
            RunOutcome::Failed { error, .. } => bail!(error),
            _ => Ok(()),
        }
    }
}
