//! Fans one instruction out to several agents and aggregates what comes back.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::DelegationConfig;
use crate::core::agent::{AgentDirectory, AgentStore, RunnableAgent, SupervisedAgent};

/// Error text recorded for a candidate that did not answer in time.
pub const TIMEOUT: &str = "TIMEOUT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRequest {
    #[serde(default, alias = "user_id")]
    pub user_id: String,
    pub instruction: String,
    /// Explicit candidates. Absent or empty means every agent the user owns.
    #[serde(default, alias = "preferred_agents")]
    pub preferred_agents: Option<Vec<String>>,
    /// Per-agent timeout in milliseconds.
    #[serde(default, alias = "timeoutMs", alias = "timeout_ms")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    Completed,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationResult {
    pub agent_id: String,
    pub status: DelegationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Partial,
    Failed,
}

impl ReportStatus {
    /// `success` iff all completed, `failed` iff none did (including no candidates).
    pub fn from_counts(completed: usize, total: usize) -> Self {
        if completed == 0 {
            ReportStatus::Failed
        } else if completed == total {
            ReportStatus::Success
        } else {
            ReportStatus::Partial
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationReport {
    pub status: ReportStatus,
    pub results: Vec<DelegationResult>,
    pub summary: String,
    #[serde(rename = "totalTime")]
    pub total_time_ms: u64,
}

impl DelegationReport {
    fn from_results(results: Vec<DelegationResult>, total: Duration) -> Self {
        let count = |s: DelegationStatus| results.iter().filter(|r| r.status == s).count();
        let completed = count(DelegationStatus::Completed);
        let failed = count(DelegationStatus::Failed);
        let timed_out = count(DelegationStatus::Timeout);
        let summary = if results.is_empty() {
            "No agents were available to handle the instruction.".to_string()
        } else {
            format!(
                "{}/{} agents completed ({} failed, {} timed out).",
                completed,
                results.len(),
                failed,
                timed_out
            )
        };
        Self {
            status: ReportStatus::from_counts(completed, results.len()),
            results,
            summary,
            total_time_ms: total.as_millis() as u64,
        }
    }

    fn failed(summary: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Failed,
            results: Vec::new(),
            summary: summary.into(),
            total_time_ms: 0,
        }
    }
}

pub struct DelegationRouter {
    store: Arc<dyn AgentStore>,
    directory: Arc<dyn AgentDirectory>,
    default_timeout: Duration,
}

impl DelegationRouter {
    pub fn new(
        store: Arc<dyn AgentStore>,
        directory: Arc<dyn AgentDirectory>,
        config: &DelegationConfig,
    ) -> Self {
        Self {
            store,
            directory,
            default_timeout: Duration::from_millis(config.default_timeout_ms),
        }
    }

    /// Resolve candidates for the request and run them all. Never fails; problems land in the report.
    pub async fn delegate(&self, request: DelegationRequest) -> DelegationReport {
        let ids = match self.candidates(&request).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Delegation for {} could not list agents: {}", request.user_id, e);
                return DelegationReport::failed(format!("Could not list agents: {}", e));
            }
        };
        let agents: Vec<Arc<dyn RunnableAgent>> = ids
            .into_iter()
            .map(|id| {
                Arc::new(SupervisedAgent::new(self.directory.clone(), id, &request.user_id))
                    as Arc<dyn RunnableAgent>
            })
            .collect();
        let timeout = request
            .timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        info!(
            "Delegating to {} agent(s) for {} (timeout {:?})",
            agents.len(),
            request.user_id,
            timeout
        );
        fan_out(agents, &request.instruction, timeout).await
    }

    async fn candidates(&self, request: &DelegationRequest) -> anyhow::Result<Vec<String>> {
        match request.preferred_agents.as_deref() {
            Some(ids) if !ids.is_empty() => {
                let mut out: Vec<String> = Vec::with_capacity(ids.len());
                for id in ids {
                    if !out.contains(id) {
                        out.push(id.clone());
                    }
                }
                Ok(out)
            }
            _ => Ok(self
                .store
                .list_agents_by_owner(&request.user_id)
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect()),
        }
    }
}

/// Run every agent concurrently, each raced against its own timeout, and wait for all of them.
///
/// A timed-out run is detached rather than aborted: it may still finish and log, but
/// the report ignores it. Results keep the input order.
pub async fn fan_out(
    agents: Vec<Arc<dyn RunnableAgent>>,
    instruction: &str,
    timeout: Duration,
) -> DelegationReport {
    let started = Instant::now();
    let mut set = JoinSet::new();
    for (index, agent) in agents.iter().enumerate() {
        let agent = agent.clone();
        let instruction = instruction.to_string();
        set.spawn(async move {
            let id = agent.id().to_string();
            let began = Instant::now();
            let run = tokio::spawn(async move { agent.run(Some(instruction)).await });
            let outcome = tokio::time::timeout(timeout, run).await;
            let elapsed = began.elapsed().as_millis() as u64;
            let result = match outcome {
                Err(_) => DelegationResult {
                    agent_id: id,
                    status: DelegationStatus::Timeout,
                    result: None,
                    error: Some(TIMEOUT.to_string()),
                    execution_time_ms: elapsed,
                },
                Ok(Err(join)) => DelegationResult {
                    agent_id: id,
                    status: DelegationStatus::Failed,
                    result: None,
                    error: Some(format!("agent task aborted: {}", join)),
                    execution_time_ms: elapsed,
                },
                Ok(Ok(run)) if run.is_success() => DelegationResult {
                    agent_id: id,
                    status: DelegationStatus::Completed,
                    result: Some(run.summary()),
                    error: None,
                    execution_time_ms: elapsed,
                },
                Ok(Ok(run)) => DelegationResult {
                    agent_id: id,
                    status: DelegationStatus::Failed,
                    result: None,
                    error: Some(run.error().unwrap_or("run failed").to_string()),
                    execution_time_ms: elapsed,
                },
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<DelegationResult>> = vec![None; agents.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => warn!("Delegation task panicked: {}", e),
        }
    }
    let results = slots
        .into_iter()
        .zip(agents.iter())
        .map(|(slot, agent)| {
            slot.unwrap_or_else(|| DelegationResult {
                agent_id: agent.id().to_string(),
                status: DelegationStatus::Failed,
                result: None,
                error: Some("delegation task panicked".to_string()),
                execution_time_ms: 0,
            })
        })
        .collect();
    DelegationReport::from_results(results, started.elapsed())
}
