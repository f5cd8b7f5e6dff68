//! Matches inbound events to the agents whose triggers they satisfy.

pub mod condition;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::agent::{AgentDirectory, AgentStore, RunRequest, Trigger, TriggerKind, WILDCARD};
use crate::core::brain::history::summarize_result;
use crate::core::supervisor::RunResult;
use crate::error::StoreError;

const CONTEXT_PAYLOAD_CHARS: usize = 4000;

/// Ephemeral input to the matcher. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    /// Restricts matches to agents of this owner.
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    /// Webhook path for webhook events.
    #[serde(default)]
    pub path: Option<String>,
}

impl Event {
    pub fn webhook(path: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: TriggerKind::Webhook,
            source: "webhook".to_string(),
            event: "received".to_string(),
            payload,
            user_id: None,
            path: Some(path.into()),
        }
    }

    pub fn integration(source: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: TriggerKind::IntegrationEvent,
            source: source.into(),
            event: event.into(),
            payload,
            user_id: None,
            path: None,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Context handed to the triggered run.
    fn run_context(&self) -> String {
        let mut out = format!("Triggered by {} event", self.kind.as_str());
        if !self.source.is_empty() || !self.event.is_empty() {
            out.push_str(&format!(" {}.{}", self.source, self.event));
        }
        if let Some(path) = &self.path {
            out.push_str(&format!(" on webhook path '{}'", path));
        }
        out.push_str(".\nPayload: ");
        out.push_str(&summarize_result(&self.payload, CONTEXT_PAYLOAD_CHARS));
        out
    }
}

/// `source.event`, `source.*` or `*`.
pub fn pattern_matches(pattern: &str, source: &str, event: &str) -> bool {
    let pattern = pattern.trim();
    if pattern == WILDCARD {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return prefix == source;
    }
    pattern == format!("{}.{}", source, event)
}

/// Type-specific structural check, before any condition.
fn structurally_matches(trigger: &Trigger, event: &Event) -> bool {
    if trigger.kind != event.kind {
        return false;
    }
    let pattern = trigger
        .config
        .pattern
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    // Webhook events carry no source/event pair worth matching; the path decides.
    match trigger.kind {
        TriggerKind::Webhook => {
            event.path.is_some() && trigger.config.webhook_path == event.path
        }
        TriggerKind::IntegrationEvent => {
            pattern.is_some_and(|p| pattern_matches(p, &event.source, &event.event))
        }
        TriggerKind::Schedule | TriggerKind::Manual => {
            pattern.is_none_or(|p| pattern_matches(p, &event.source, &event.event))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerMatch {
    pub agent_id: String,
    pub owner_id: String,
    pub trigger_id: String,
    #[serde(skip)]
    pub trigger: Trigger,
}

/// A match whose run has been started in the background.
pub struct DispatchedRun {
    pub matched: TriggerMatch,
    pub handle: JoinHandle<RunResult>,
}

pub struct TriggerEngine {
    store: Arc<dyn AgentStore>,
}

impl TriggerEngine {
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self { store }
    }

    /// All (agent, owner, trigger) triples the event should run. Order is unspecified.
    pub async fn match_event(&self, event: &Event) -> Result<Vec<TriggerMatch>, StoreError> {
        let candidates = match event.kind {
            TriggerKind::Webhook => match event.path.as_deref() {
                Some(path) => self.store.find_webhook_trigger(path).await?.into_iter().collect(),
                None => Vec::new(),
            },
            kind => self.store.list_triggers(kind).await?,
        };

        let mut matches = Vec::new();
        for trigger in candidates {
            if !trigger.enabled {
                continue;
            }
            if let Some(user) = event.user_id.as_deref()
                && trigger.owner_id != user
            {
                continue;
            }
            if !structurally_matches(&trigger, event) {
                continue;
            }
            let Some(agent) = self.store.get_agent(&trigger.agent_id).await? else {
                warn!("Trigger {} points at missing agent {}", trigger.id, trigger.agent_id);
                continue;
            };
            if agent.owner_id != trigger.owner_id {
                warn!("Trigger {} owner does not match agent {}", trigger.id, agent.id);
                continue;
            }
            if !self.condition_holds(&trigger, event) {
                continue;
            }
            matches.push(TriggerMatch {
                agent_id: agent.id.clone(),
                owner_id: agent.owner_id.clone(),
                trigger_id: trigger.id.clone(),
                trigger,
            });
        }
        Ok(matches)
    }

    /// Evaluation errors are logged and count as no match.
    fn condition_holds(&self, trigger: &Trigger, event: &Event) -> bool {
        let Some(cond) = trigger.condition.as_ref() else {
            return true;
        };
        if !condition::matches(Some(cond), &event.payload) {
            if let Err(e) = condition::evaluate(cond, &event.payload) {
                warn!("Trigger {} condition failed to evaluate: {}", trigger.id, e);
            } else {
                debug!("Trigger {} condition not met", trigger.id);
            }
            return false;
        }
        true
    }

    /// Match the event and start one independent run per match.
    ///
    /// `last_triggered_at` is stamped when the run is started, not when it finishes,
    /// so a crash in between leaves the stamp ahead of the run log.
    pub async fn dispatch(
        &self,
        event: &Event,
        directory: Arc<dyn AgentDirectory>,
    ) -> Result<Vec<DispatchedRun>, StoreError> {
        let matches = self.match_event(event).await?;
        let context = event.run_context();
        let mut runs = Vec::with_capacity(matches.len());
        for matched in matches {
            if let Err(e) = self.store.mark_triggered(&matched.trigger_id, Utc::now()).await {
                warn!("Failed to stamp trigger {}: {}", matched.trigger_id, e);
            }
            info!(agent = %matched.agent_id, "Trigger {} fired", matched.trigger_id);
            let request = RunRequest::new(&matched.agent_id, &matched.owner_id).with_context(context.clone());
            let directory = directory.clone();
            let handle = tokio::spawn(async move { directory.run_agent(request).await });
            runs.push(DispatchedRun { matched, handle });
        }
        Ok(runs)
    }
}
