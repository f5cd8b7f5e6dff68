//! Owner-checked management operations over the store and the job queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::{AgentRecord, AgentStore, ScheduleSpec, Trigger, TriggerConfig, TriggerKind, WILDCARD};
use crate::core::scheduler::{self, JobQueue, RecurringEntry};
use crate::error::{ManageError, StoreError};

pub type ManageResult<T> = Result<T, ManageError>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAgent {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "systemPrompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub integrations: Vec<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "systemPrompt")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub integrations: Option<Vec<String>>,
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
}

/// Schedule toggle. Omitted interval and cron keep the current ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleUpdate {
    pub enabled: bool,
    #[serde(default, alias = "intervalMinutes")]
    pub interval_minutes: Option<u64>,
    #[serde(default)]
    pub cron: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrigger {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    #[serde(default)]
    pub config: TriggerConfig,
    #[serde(default)]
    pub condition: Option<Value>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletedAgent {
    pub recurring_entries_removed: usize,
    pub triggers_removed: usize,
}

pub struct AgentManager {
    store: Arc<dyn AgentStore>,
    queue: Arc<dyn JobQueue>,
}

impl AgentManager {
    pub fn new(store: Arc<dyn AgentStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    pub async fn create_agent(&self, owner_id: &str, new: NewAgent) -> ManageResult<AgentRecord> {
        let name = required("name", &new.name)?;
        let prompt = required("system_prompt", &new.system_prompt)?;
        let mut agent = AgentRecord::new(owner_id, name, prompt);
        agent.description = new.description.trim().to_string();
        agent.model = new.model.filter(|m| !m.trim().is_empty());
        agent.tools = new.tools;
        agent.integrations = new.integrations;
        if let Some(schedule) = new.schedule {
            validate_schedule(&schedule)?;
            agent.schedule = schedule;
        }

        self.store.save_agent(&agent).await?;
        if agent.schedule.effective().is_some() {
            scheduler::schedule_agent(self.queue.as_ref(), &agent).await?;
        }
        info!(agent = %agent.id, "Created agent '{}' for {}", agent.name, owner_id);
        Ok(agent)
    }

    pub async fn get_agent(&self, caller: &str, agent_id: &str) -> ManageResult<AgentRecord> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "agent",
                id: agent_id.to_string(),
            })?;
        if !agent.is_owned_by(caller) {
            return Err(ManageError::Unauthorized(agent_id.to_string()));
        }
        Ok(agent)
    }

    pub async fn list_agents(&self, caller: &str) -> ManageResult<Vec<AgentRecord>> {
        Ok(self.store.list_agents_by_owner(caller).await?)
    }

    pub async fn update_agent(
        &self,
        caller: &str,
        agent_id: &str,
        patch: AgentPatch,
    ) -> ManageResult<AgentRecord> {
        let mut agent = self.get_agent(caller, agent_id).await?;
        if let Some(name) = patch.name {
            agent.name = required("name", &name)?;
        }
        if let Some(description) = patch.description {
            agent.description = description.trim().to_string();
        }
        if let Some(prompt) = patch.system_prompt {
            agent.system_prompt = required("system_prompt", &prompt)?;
        }
        if let Some(model) = patch.model {
            agent.model = Some(model).filter(|m| !m.trim().is_empty());
        }
        if let Some(tools) = patch.tools {
            agent.tools = tools;
        }
        if let Some(integrations) = patch.integrations {
            agent.integrations = integrations;
        }
        if let Some(schedule) = patch.schedule {
            validate_schedule(&schedule)?;
            agent.schedule = schedule;
        }

        self.store.update_agent_config(&agent).await?;
        scheduler::schedule_agent(self.queue.as_ref(), &agent).await?;
        Ok(agent)
    }

    /// Removes every recurring entry, then the triggers, then the record.
    pub async fn delete_agent(&self, caller: &str, agent_id: &str) -> ManageResult<DeletedAgent> {
        let agent = self.get_agent(caller, agent_id).await?;
        let recurring_entries_removed = scheduler::unschedule_agent(self.queue.as_ref(), &agent.id).await?;
        let triggers_removed = self.store.delete_triggers_for_agent(&agent.id).await?;
        self.store.delete_agent(&agent.id).await?;
        info!(
            agent = %agent.id,
            "Deleted agent ({} recurring entries, {} triggers)",
            recurring_entries_removed,
            triggers_removed
        );
        Ok(DeletedAgent {
            recurring_entries_removed,
            triggers_removed,
        })
    }

    pub async fn set_schedule(
        &self,
        caller: &str,
        agent_id: &str,
        update: ScheduleUpdate,
    ) -> ManageResult<AgentRecord> {
        let mut agent = self.get_agent(caller, agent_id).await?;
        let mut schedule = agent.schedule.clone();
        schedule.enabled = update.enabled;
        if let Some(minutes) = update.interval_minutes {
            schedule.interval_minutes = Some(minutes);
            if update.cron.is_none() {
                schedule.cron = None;
            }
        }
        if let Some(cron) = update.cron {
            schedule.cron = Some(cron.trim().to_string());
            if update.interval_minutes.is_none() {
                schedule.interval_minutes = None;
            }
        }
        validate_schedule(&schedule)?;
        agent.schedule = schedule;

        self.store.update_agent_config(&agent).await?;
        scheduler::schedule_agent(self.queue.as_ref(), &agent).await?;
        Ok(agent)
    }

    pub async fn list_schedules(&self, caller: &str, agent_id: &str) -> ManageResult<Vec<RecurringEntry>> {
        let agent = self.get_agent(caller, agent_id).await?;
        Ok(scheduler::entries_for_agent(self.queue.as_ref(), &agent.id).await?)
    }

    /// Webhook triggers without a path get a random one.
    pub async fn add_trigger(
        &self,
        caller: &str,
        agent_id: &str,
        new: NewTrigger,
    ) -> ManageResult<Trigger> {
        let agent = self.get_agent(caller, agent_id).await?;
        let mut config = new.config;
        config.pattern = config
            .pattern
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if let Some(pattern) = config.pattern.as_deref() {
            validate_pattern(pattern)?;
        }

        match new.kind {
            TriggerKind::Webhook => {
                if config.pattern.is_some() {
                    return Err(ManageError::Invalid(
                        "webhook triggers match on webhookPath only and take no pattern".to_string(),
                    ));
                }
                let path = match config.webhook_path.as_deref().map(|p| p.trim().trim_matches('/')) {
                    Some(p) if !p.is_empty() => p.to_string(),
                    _ => uuid::Uuid::new_v4().simple().to_string(),
                };
                validate_webhook_path(&path)?;
                config.webhook_path = Some(path);
            }
            TriggerKind::IntegrationEvent => {
                if config.pattern.is_none() {
                    return Err(ManageError::Invalid(
                        "integration_event triggers need a pattern such as 'github.*'".to_string(),
                    ));
                }
                config.webhook_path = None;
            }
            TriggerKind::Schedule | TriggerKind::Manual => {
                config.webhook_path = None;
            }
        }

        let condition = match new.condition {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(cond @ Value::Object(_)) => Some(cond),
            Some(_) => {
                return Err(ManageError::Invalid("condition must be a JSON object".to_string()));
            }
        };

        let mut trigger = Trigger::new(&agent, new.kind, config);
        trigger.condition = condition;
        trigger.enabled = new.enabled;
        self.store.save_trigger(&trigger).await?;
        info!(agent = %agent.id, "Added {} trigger {}", trigger.kind.as_str(), trigger.id);
        Ok(trigger)
    }

    pub async fn list_triggers(&self, caller: &str, agent_id: &str) -> ManageResult<Vec<Trigger>> {
        let agent = self.get_agent(caller, agent_id).await?;
        Ok(self.store.list_triggers_for_agent(&agent.id).await?)
    }

    /// Re-arm every persisted schedule, e.g. after a restart. Returns how many were armed.
    /// An agent whose schedule cannot be armed is logged and skipped.
    pub async fn rearm_all(&self) -> ManageResult<usize> {
        let mut armed = 0;
        for agent in self.store.list_agents().await? {
            match scheduler::schedule_agent(self.queue.as_ref(), &agent).await {
                Ok(Some(_)) => armed += 1,
                Ok(None) => {}
                Err(e) => warn!(agent = %agent.id, "Skipping schedule that cannot be armed: {}", e),
            }
        }
        Ok(armed)
    }
}

fn required(field: &str, value: &str) -> ManageResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ManageError::Invalid(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn validate_schedule(schedule: &ScheduleSpec) -> ManageResult<()> {
    if let Some(cron) = schedule.cron.as_deref().filter(|c| !c.trim().is_empty()) {
        scheduler::validate_cron(cron).map_err(|e| ManageError::Invalid(e.to_string()))?;
    }
    if schedule.enabled && schedule.effective().is_none() {
        return Err(ManageError::Invalid(
            "an enabled schedule needs intervalMinutes > 0 or a cron expression".to_string(),
        ));
    }
    Ok(())
}

fn validate_pattern(pattern: &str) -> ManageResult<()> {
    if pattern == WILDCARD {
        return Ok(());
    }
    let valid = match pattern.split_once('.') {
        Some((source, event)) => !source.is_empty() && !event.is_empty() && !source.contains('*'),
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ManageError::Invalid(format!(
            "pattern '{}' must look like 'source.event', 'source.*' or '*'",
            pattern
        )))
    }
}

fn validate_webhook_path(path: &str) -> ManageResult<()> {
    if path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(ManageError::Invalid(format!(
            "webhook path '{}' may only contain letters, digits, '-' and '_'",
            path
        )))
    }
}
