//! Agent and trigger records, plus the persistence and management layers around them.

pub mod kind;
pub mod manager;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::brain::decision::Decision;

pub use kind::{AgentDirectory, RunRequest, RunnableAgent, SupervisedAgent};
pub use manager::{AgentManager, AgentPatch, DeletedAgent, NewAgent, NewTrigger, ScheduleUpdate};
pub use store::{AgentStore, MemoryStore, SqliteStore};

/// Marker in a permitted-tool set meaning "any tool".
pub const WILDCARD: &str = "*";

/// A configured autonomous unit. Owned by exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    /// Model identifier; `None` uses the configured default.
    #[serde(default)]
    pub model: Option<String>,
    /// Permitted tool names. Empty or containing `*` permits everything.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Permitted integration names (e.g. `gmail`, `github`).
    #[serde(default)]
    pub integrations: Vec<String>,
    #[serde(default)]
    pub schedule: ScheduleSpec,
    /// Append-only run history.
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            owner_id: owner_id.into(),
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            model: None,
            tools: Vec::new(),
            integrations: Vec::new(),
            schedule: ScheduleSpec::default(),
            log: Vec::new(),
            last_run_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    pub fn tool_filter(&self) -> ToolFilter {
        ToolFilter::new(&self.tools, &self.integrations)
    }
}

/// Which tools and integrations an agent may touch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolFilter {
    tools: Option<Vec<String>>,
    integrations: Vec<String>,
}

impl ToolFilter {
    pub fn new(tools: &[String], integrations: &[String]) -> Self {
        let open = tools.is_empty() || tools.iter().any(|t| t == WILDCARD);
        Self {
            tools: if open { None } else { Some(tools.to_vec()) },
            integrations: integrations.to_vec(),
        }
    }

    /// A filter that permits every tool and every integration.
    pub fn allow_all() -> Self {
        Self {
            tools: None,
            integrations: vec![WILDCARD.to_string()],
        }
    }

    pub fn permits_tool(&self, name: &str) -> bool {
        match &self.tools {
            None => true,
            Some(list) => list.iter().any(|t| t == name),
        }
    }

    pub fn permits_integration(&self, integration: &str) -> bool {
        self.integrations
            .iter()
            .any(|i| i == WILDCARD || i.eq_ignore_ascii_case(integration))
    }

    pub fn permitted_tools(&self) -> Vec<String> {
        self.tools
            .clone()
            .unwrap_or_else(|| vec![WILDCARD.to_string()])
    }
}

/// Run policy. When both are set, the interval wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, alias = "intervalMinutes")]
    pub interval_minutes: Option<u64>,
    #[serde(default)]
    pub cron: Option<String>,
}

/// The single repeat rule that governs a schedule at evaluation time.
/// Serializes as `{"every": ms}` or `{"cron": expr}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    /// Milliseconds between runs.
    Every(u64),
    Cron(String),
}

impl Repeat {
    pub fn every(&self) -> Option<Duration> {
        match self {
            Repeat::Every(ms) => Some(Duration::from_millis(*ms)),
            Repeat::Cron(_) => None,
        }
    }
}

impl ScheduleSpec {
    pub fn interval(minutes: u64) -> Self {
        Self {
            enabled: true,
            interval_minutes: Some(minutes),
            cron: None,
        }
    }

    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            enabled: true,
            interval_minutes: None,
            cron: Some(expr.into()),
        }
    }

    pub fn effective(&self) -> Option<Repeat> {
        if !self.enabled {
            return None;
        }
        if let Some(minutes) = self.interval_minutes.filter(|m| *m > 0) {
            return Some(Repeat::Every(minutes.saturating_mul(60_000)));
        }
        self.cron
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| Repeat::Cron(c.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Scheduled or autonomous tick; the agent's own prompt is the task.
    Unattended,
    /// Explicit user instruction, routed through the orchestrator.
    Directed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Completed,
    Failed,
}

/// One executed decision, kept so partial progress survives a failed run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub turn: usize,
    pub decision: Decision,
    pub ok: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub mode: RunMode,
    pub status: LogStatus,
    pub attempts: u32,
    pub summary: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule,
    Webhook,
    IntegrationEvent,
    Manual,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Schedule => "schedule",
            TriggerKind::Webhook => "webhook",
            TriggerKind::IntegrationEvent => "integration_event",
            TriggerKind::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "schedule" => Some(TriggerKind::Schedule),
            "webhook" => Some(TriggerKind::Webhook),
            "integration_event" => Some(TriggerKind::IntegrationEvent),
            "manual" => Some(TriggerKind::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerConfig {
    /// Globally unique path for webhook triggers.
    #[serde(default, alias = "webhookPath")]
    pub webhook_path: Option<String>,
    /// `source.event`, `source.*` or `*`.
    #[serde(default)]
    pub pattern: Option<String>,
    /// HMAC secret for signed webhook deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// A rule binding an agent to an activating condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub id: String,
    pub agent_id: String,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    #[serde(default)]
    pub config: TriggerConfig,
    /// Condition expression evaluated against the event payload.
    #[serde(default)]
    pub condition: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Trigger {
    pub fn new(agent: &AgentRecord, kind: TriggerKind, config: TriggerConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            agent_id: agent.id.clone(),
            owner_id: agent.owner_id.clone(),
            kind,
            config,
            condition: None,
            enabled: true,
            last_triggered_at: None,
        }
    }
}
