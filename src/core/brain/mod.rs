//! The decision loop: model call, decision recovery, tool dispatch, repeat.

pub mod decision;
pub mod history;
pub mod policy;

use tracing::{info, warn};

use crate::config::RunnerConfig;
use crate::core::agent::{AgentDirectory, AgentRecord, RunMode, RunRequest, StepRecord};
use crate::core::llm::{ChatMessage, LlmManager};
use crate::core::tools::{ToolContext, ToolDispatcher, ToolDescriptor, render_catalog};

use decision::{AgentDecision, Decision, Recovery, ToolDecision};
use history::{History, summarize_result};
use policy::EmailPolicy;

pub struct LoopRequest<'a> {
    pub agent: &'a AgentRecord,
    pub mode: RunMode,
    pub instruction: Option<&'a str>,
    pub context: Option<&'a str>,
    pub caller: &'a str,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// The model answered in plain language.
    Final { reply: String },
    /// Directed mode: a validated decision for the caller to carry out.
    Pending { reply: String, decision: Decision },
    /// Budget ran out before the model finished. The agent did not act.
    Exhausted {
        last_reply: String,
        /// Email the unattended policy still owes, to be attempted once by the caller.
        forced_send: Option<ToolDecision>,
    },
}

#[derive(Debug, Clone)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    pub steps: Vec<StepRecord>,
    pub turns: usize,
}

/// A model call failed. Steps executed before the failure are kept.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct LoopError {
    pub error: anyhow::Error,
    pub steps: Vec<StepRecord>,
}

const DECISION_FORMAT: &str = "DECISION FORMAT:\n\
     To call a tool, reply with ONLY this JSON object:\n\
     {\"type\": \"tool\", \"target\": \"<tool_name>\", \"args\": { ... }}\n\
     To hand work to another agent, reply with ONLY:\n\
     {\"type\": \"agent\", \"target\": \"<agent_id>\", \"args\": {\"input\": \"...\"}}\n\
     Make one decision per reply and wait for its result.\n\
     When the task is complete, reply in plain language without JSON.\n\
     To change how often you run, include {\"schedule\": {\"enabled\": true, \"intervalMinutes\": N}} \
     or {\"schedule\": {\"enabled\": true, \"cron\": \"<expr>\"}} in your final reply.\n";

fn unattended_system_prompt(agent: &AgentRecord, catalog: &[ToolDescriptor]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are '{}', an autonomous agent running unattended. No human is watching; \
         carry the task through to the end using your tools.\n\n",
        agent.name
    ));
    prompt.push_str("--- YOUR INSTRUCTIONS ---\n");
    prompt.push_str(agent.system_prompt.trim());
    prompt.push_str("\n--- END INSTRUCTIONS ---\n\n");
    prompt.push_str(DECISION_FORMAT);
    prompt.push_str("\n--- AVAILABLE TOOLS ---\n");
    prompt.push_str(&render_catalog(catalog));
    prompt.push_str("--- END OF TOOLS ---\n");
    prompt
}

fn orchestrator_system_prompt(agent: &AgentRecord, catalog: &[ToolDescriptor]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are the orchestrator. Read the user's request and decide the single next action. \
         Answer directly when no action is needed. Only use tools listed in AVAILABLE TOOLS; \
         never invent tool names.\n\n",
    );
    prompt.push_str(&format!("--- AGENT '{}' ---\n", agent.name));
    if !agent.description.trim().is_empty() {
        prompt.push_str(agent.description.trim());
        prompt.push('\n');
    }
    prompt.push_str(agent.system_prompt.trim());
    prompt.push_str("\n--- END AGENT ---\n\n");
    prompt.push_str(DECISION_FORMAT);
    prompt.push_str("\n--- AVAILABLE TOOLS ---\n");
    prompt.push_str(&render_catalog(catalog));
    prompt.push_str("--- END OF TOOLS ---\n");
    prompt
}

pub struct DecisionLoop {
    llm: LlmManager,
    tools: ToolDispatcher,
    runner: RunnerConfig,
}

impl DecisionLoop {
    pub fn new(llm: LlmManager, tools: ToolDispatcher, runner: RunnerConfig) -> Self {
        Self { llm, tools, runner }
    }

    pub fn tools(&self) -> &ToolDispatcher {
        &self.tools
    }

    pub fn budget(&self, mode: RunMode) -> usize {
        match mode {
            RunMode::Unattended => self.runner.unattended_budget,
            RunMode::Directed => self.runner.conversational_budget,
        }
        .max(1)
    }

    pub async fn run(
        &self,
        req: LoopRequest<'_>,
        directory: &dyn AgentDirectory,
    ) -> Result<LoopReport, LoopError> {
        match req.mode {
            RunMode::Unattended => self.run_unattended(req, directory).await,
            RunMode::Directed => self.run_directed(req).await,
        }
    }

    async fn generate(
        &self,
        agent: &AgentRecord,
        history: &History,
        steps: &[StepRecord],
    ) -> Result<String, LoopError> {
        self.llm
            .generate(agent.model.as_deref(), history.messages())
            .await
            .map_err(|error| LoopError {
                error,
                steps: steps.to_vec(),
            })
    }

    async fn run_unattended(
        &self,
        req: LoopRequest<'_>,
        directory: &dyn AgentDirectory,
    ) -> Result<LoopReport, LoopError> {
        let agent = req.agent;
        let filter = agent.tool_filter();
        let catalog = self.tools.registry().catalog(&filter);
        let mut policy = EmailPolicy::detect(&agent.system_prompt, &catalog);
        let ctx = ToolContext {
            agent_id: agent.id.clone(),
            user_id: agent.owner_id.clone(),
        };

        let mut history = History::new(
            ChatMessage::system(unattended_system_prompt(agent, &catalog)),
            self.runner.history_cap,
            self.runner.history_keep,
        );
        let mut kickoff = String::from("Run your task now.");
        if let Some(context) = req.context.filter(|c| !c.trim().is_empty()) {
            kickoff.push_str("\n\n--- TRIGGER CONTEXT ---\n");
            kickoff.push_str(context);
            kickoff.push_str("\n--- END CONTEXT ---");
        }
        history.push(ChatMessage::user(kickoff));

        let budget = self.budget(RunMode::Unattended);
        let mut steps: Vec<StepRecord> = Vec::new();
        let mut last_reply = String::new();

        for turn in 1..=budget {
            let reply = self.generate(agent, &history, &steps).await?;
            info!(agent = %agent.id, "Decision loop turn {}: {} chars", turn, reply.len());
            history.push(ChatMessage::assistant(reply.clone()));
            last_reply = reply.clone();

            match decision::recover(&reply) {
                Recovery::NoDecision => {
                    if let Some(p) = policy.as_ref().filter(|p| !p.is_satisfied()) {
                        info!(agent = %agent.id, "Email policy unsatisfied at turn {}, re-prompting", turn);
                        history.push(ChatMessage::user(p.reminder()));
                        continue;
                    }
                    return Ok(LoopReport {
                        outcome: LoopOutcome::Final { reply },
                        steps,
                        turns: turn,
                    });
                }
                Recovery::Act(Decision::Tool(call)) => {
                    match self.tools.dispatch(&call, &filter, &ctx).await {
                        Ok(output) => {
                            let summary = summarize_result(&output, self.runner.result_char_limit);
                            if let Some(p) = policy.as_mut() {
                                p.record_success(&call, &summary);
                            }
                            history.push(ChatMessage::user(format!(
                                "Tool `{}` result: {}",
                                call.target, summary
                            )));
                            steps.push(StepRecord {
                                turn,
                                decision: Decision::Tool(call),
                                ok: true,
                                summary,
                            });
                        }
                        Err(e) => {
                            warn!(agent = %agent.id, "Tool dispatch failed: {}", e);
                            if let Some(p) = policy.as_mut() {
                                p.record_failure(&call);
                            }
                            history.push(ChatMessage::user(format!(
                                "{}\nFix the arguments or choose a different tool, then continue.",
                                e
                            )));
                            steps.push(StepRecord {
                                turn,
                                decision: Decision::Tool(call),
                                ok: false,
                                summary: e.to_string(),
                            });
                        }
                    }
                }
                Recovery::Act(Decision::Agent(call)) => {
                    let (ok, summary) = self.delegate(&req, &call, directory).await;
                    history.push(ChatMessage::user(format!(
                        "Agent `{}` {}: {}",
                        call.target,
                        if ok { "replied" } else { "failed" },
                        history::truncate_chars(&summary, self.runner.result_char_limit)
                    )));
                    steps.push(StepRecord {
                        turn,
                        decision: Decision::Agent(call),
                        ok,
                        summary,
                    });
                }
            }
        }

        info!(agent = %agent.id, "Decision loop exhausted after {} turns", budget);
        let forced_send = policy
            .filter(|p| !p.is_satisfied())
            .map(|p| p.forced_call(&agent.name, &last_reply));
        Ok(LoopReport {
            outcome: LoopOutcome::Exhausted {
                last_reply,
                forced_send,
            },
            steps,
            turns: budget,
        })
    }

    async fn delegate(
        &self,
        req: &LoopRequest<'_>,
        call: &AgentDecision,
        directory: &dyn AgentDirectory,
    ) -> (bool, String) {
        if req.depth >= self.runner.max_delegation_depth {
            return (
                false,
                format!(
                    "delegation depth limit ({}) reached; finish the task yourself",
                    self.runner.max_delegation_depth
                ),
            );
        }
        if call.target == req.agent.id {
            return (false, "an agent cannot delegate to itself".to_string());
        }
        let request = RunRequest::new(&call.target, req.caller)
            .with_instruction(Some(call.args.input.clone()))
            .at_depth(req.depth + 1);
        let result = directory.run_agent(request).await;
        (result.is_success(), result.summary())
    }

    async fn run_directed(&self, req: LoopRequest<'_>) -> Result<LoopReport, LoopError> {
        let agent = req.agent;
        let filter = agent.tool_filter();
        let catalog = self.tools.registry().catalog(&filter);

        let mut history = History::new(
            ChatMessage::system(orchestrator_system_prompt(agent, &catalog)),
            self.runner.history_cap,
            self.runner.history_keep,
        );
        history.push(ChatMessage::user(req.instruction.unwrap_or_default()));

        let budget = self.budget(RunMode::Directed);
        let mut last_reply = String::new();

        for turn in 1..=budget {
            let reply = self.generate(agent, &history, &[]).await?;
            info!(agent = %agent.id, "Orchestrator turn {}: {} chars", turn, reply.len());
            history.push(ChatMessage::assistant(reply.clone()));
            last_reply = reply.clone();

            match decision::recover(&reply) {
                Recovery::NoDecision => {
                    return Ok(LoopReport {
                        outcome: LoopOutcome::Final { reply },
                        steps: Vec::new(),
                        turns: turn,
                    });
                }
                Recovery::Act(Decision::Tool(call)) => {
                    match self.tools.resolve(&call.target, &filter) {
                        Ok(_) => {
                            return Ok(LoopReport {
                                outcome: LoopOutcome::Pending {
                                    reply,
                                    decision: Decision::Tool(call),
                                },
                                steps: Vec::new(),
                                turns: turn,
                            });
                        }
                        Err(e) => {
                            warn!(agent = %agent.id, "Orchestrator picked an unusable tool: {}", e);
                            history.push(ChatMessage::user(format!(
                                "{}\nPick a listed tool or answer directly.",
                                e
                            )));
                        }
                    }
                }
                Recovery::Act(decision @ Decision::Agent(_)) => {
                    return Ok(LoopReport {
                        outcome: LoopOutcome::Pending { reply, decision },
                        steps: Vec::new(),
                        turns: turn,
                    });
                }
            }
        }

        Ok(LoopReport {
            outcome: LoopOutcome::Exhausted {
                last_reply,
                forced_send: None,
            },
            steps: Vec::new(),
            turns: budget,
        })
    }
}
