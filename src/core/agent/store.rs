//! Id-based document storage for agents and triggers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{AgentRecord, LogEntry, Trigger, TriggerKind};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_agent(&self, id: &str) -> StoreResult<Option<AgentRecord>>;
    async fn list_agents(&self) -> StoreResult<Vec<AgentRecord>>;
    async fn list_agents_by_owner(&self, owner_id: &str) -> StoreResult<Vec<AgentRecord>>;
    async fn save_agent(&self, agent: &AgentRecord) -> StoreResult<()>;
    /// Overwrite an existing agent's configuration. The stored `log` and
    /// `last_run_at` are kept, whatever the passed record holds.
    async fn update_agent_config(&self, agent: &AgentRecord) -> StoreResult<()>;
    async fn delete_agent(&self, id: &str) -> StoreResult<bool>;

    /// Append a log entry and stamp `last_run_at` in one read-modify-save.
    async fn record_run(&self, agent_id: &str, entry: LogEntry, at: DateTime<Utc>)
    -> StoreResult<()>;

    /// Insert or replace a trigger. Fails if its webhook path belongs to a different trigger.
    async fn save_trigger(&self, trigger: &Trigger) -> StoreResult<()>;
    async fn get_trigger(&self, id: &str) -> StoreResult<Option<Trigger>>;
    async fn list_triggers(&self, kind: TriggerKind) -> StoreResult<Vec<Trigger>>;
    async fn list_triggers_for_agent(&self, agent_id: &str) -> StoreResult<Vec<Trigger>>;
    async fn find_webhook_trigger(&self, path: &str) -> StoreResult<Option<Trigger>>;
    async fn delete_triggers_for_agent(&self, agent_id: &str) -> StoreResult<usize>;
    async fn mark_triggered(&self, trigger_id: &str, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Copy `updated` over `current`, keeping the run history `current` already has.
fn merge_config(current: &mut AgentRecord, updated: &AgentRecord) {
    let log = std::mem::take(&mut current.log);
    let last_run_at = current.last_run_at;
    *current = updated.clone();
    current.log = log;
    current.last_run_at = last_run_at;
}

fn agent_not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        kind: "agent",
        id: id.to_string(),
    }
}

// ── In-memory store ──

#[derive(Default)]
pub struct MemoryStore {
    agents: RwLock<HashMap<String, AgentRecord>>,
    triggers: RwLock<HashMap<String, Trigger>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn get_agent(&self, id: &str) -> StoreResult<Option<AgentRecord>> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn list_agents(&self) -> StoreResult<Vec<AgentRecord>> {
        let mut agents: Vec<_> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(agents)
    }

    async fn list_agents_by_owner(&self, owner_id: &str) -> StoreResult<Vec<AgentRecord>> {
        Ok(self
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| a.owner_id == owner_id)
            .collect())
    }

    async fn save_agent(&self, agent: &AgentRecord) -> StoreResult<()> {
        self.agents
            .write()
            .await
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn update_agent_config(&self, agent: &AgentRecord) -> StoreResult<()> {
        let mut agents = self.agents.write().await;
        let current = agents
            .get_mut(&agent.id)
            .ok_or_else(|| agent_not_found(&agent.id))?;
        merge_config(current, agent);
        Ok(())
    }

    async fn delete_agent(&self, id: &str) -> StoreResult<bool> {
        Ok(self.agents.write().await.remove(id).is_some())
    }

    async fn record_run(
        &self,
        agent_id: &str,
        entry: LogEntry,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| agent_not_found(agent_id))?;
        agent.log.push(entry);
        agent.last_run_at = Some(at);
        Ok(())
    }

    async fn save_trigger(&self, trigger: &Trigger) -> StoreResult<()> {
        let mut triggers = self.triggers.write().await;
        if let Some(path) = trigger.config.webhook_path.as_deref()
            && triggers
                .values()
                .any(|t| t.id != trigger.id && t.config.webhook_path.as_deref() == Some(path))
        {
            return Err(StoreError::DuplicateWebhookPath(path.to_string()));
        }
        triggers.insert(trigger.id.clone(), trigger.clone());
        Ok(())
    }

    async fn get_trigger(&self, id: &str) -> StoreResult<Option<Trigger>> {
        Ok(self.triggers.read().await.get(id).cloned())
    }

    async fn list_triggers(&self, kind: TriggerKind) -> StoreResult<Vec<Trigger>> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.kind == kind)
            .cloned()
            .collect())
    }

    async fn list_triggers_for_agent(&self, agent_id: &str) -> StoreResult<Vec<Trigger>> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn find_webhook_trigger(&self, path: &str) -> StoreResult<Option<Trigger>> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .find(|t| t.kind == TriggerKind::Webhook && t.config.webhook_path.as_deref() == Some(path))
            .cloned())
    }

    async fn delete_triggers_for_agent(&self, agent_id: &str) -> StoreResult<usize> {
        let mut triggers = self.triggers.write().await;
        let before = triggers.len();
        triggers.retain(|_, t| t.agent_id != agent_id);
        Ok(before - triggers.len())
    }

    async fn mark_triggered(&self, trigger_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(t) = self.triggers.write().await.get_mut(trigger_id) {
            t.last_triggered_at = Some(at);
        }
        Ok(())
    }
}

// ── SQLite store ──

/// Documents are stored as JSON blobs keyed by id, with a few columns lifted
/// out for lookups.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> StoreResult<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                doc TEXT NOT NULL
            )",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS triggers (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                webhook_path TEXT UNIQUE,
                doc TEXT NOT NULL
            )",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_agents_owner ON agents(owner_id)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_triggers_agent ON triggers(agent_id)",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn query_agents(
        db: &Connection,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Vec<AgentRecord>> {
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map(args, |row| row.get::<_, String>(0))?;
        let mut results = Vec::new();
        for row in rows {
            results.push(serde_json::from_str(&row?)?);
        }
        Ok(results)
    }

    fn query_triggers(
        db: &Connection,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Vec<Trigger>> {
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map(args, |row| row.get::<_, String>(0))?;
        let mut results = Vec::new();
        for row in rows {
            results.push(serde_json::from_str(&row?)?);
        }
        Ok(results)
    }

    fn load_agent(db: &Connection, id: &str) -> StoreResult<Option<AgentRecord>> {
        let doc: Option<String> = db
            .query_row("SELECT doc FROM agents WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(match doc {
            Some(doc) => Some(serde_json::from_str(&doc)?),
            None => None,
        })
    }

    fn write_agent(db: &Connection, agent: &AgentRecord) -> StoreResult<()> {
        let doc = serde_json::to_string(agent)?;
        db.execute(
            "INSERT OR REPLACE INTO agents (id, owner_id, created_at, doc) VALUES (?1, ?2, ?3, ?4)",
            params![agent.id, agent.owner_id, agent.created_at.to_rfc3339(), doc],
        )?;
        Ok(())
    }

    fn write_trigger(db: &Connection, trigger: &Trigger) -> StoreResult<()> {
        let doc = serde_json::to_string(trigger)?;
        db.execute(
            "INSERT OR REPLACE INTO triggers (id, agent_id, kind, webhook_path, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                trigger.id,
                trigger.agent_id,
                trigger.kind.as_str(),
                trigger.config.webhook_path,
                doc
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn get_agent(&self, id: &str) -> StoreResult<Option<AgentRecord>> {
        let db = self.db.lock().await;
        Self::load_agent(&db, id)
    }

    async fn list_agents(&self) -> StoreResult<Vec<AgentRecord>> {
        let db = self.db.lock().await;
        Self::query_agents(&db, "SELECT doc FROM agents ORDER BY created_at, id", &[])
    }

    async fn list_agents_by_owner(&self, owner_id: &str) -> StoreResult<Vec<AgentRecord>> {
        let db = self.db.lock().await;
        Self::query_agents(
            &db,
            "SELECT doc FROM agents WHERE owner_id = ?1 ORDER BY created_at, id",
            &[&owner_id],
        )
    }

    async fn save_agent(&self, agent: &AgentRecord) -> StoreResult<()> {
        let db = self.db.lock().await;
        Self::write_agent(&db, agent)
    }

    async fn update_agent_config(&self, agent: &AgentRecord) -> StoreResult<()> {
        let db = self.db.lock().await;
        let mut current =
            Self::load_agent(&db, &agent.id)?.ok_or_else(|| agent_not_found(&agent.id))?;
        merge_config(&mut current, agent);
        Self::write_agent(&db, &current)
    }

    async fn delete_agent(&self, id: &str) -> StoreResult<bool> {
        let db = self.db.lock().await;
        let rows_deleted = db.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
        Ok(rows_deleted > 0)
    }

    async fn record_run(
        &self,
        agent_id: &str,
        entry: LogEntry,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let db = self.db.lock().await;
        let mut agent = Self::load_agent(&db, agent_id)?.ok_or_else(|| agent_not_found(agent_id))?;
        agent.log.push(entry);
        agent.last_run_at = Some(at);
        Self::write_agent(&db, &agent)
    }

    async fn save_trigger(&self, trigger: &Trigger) -> StoreResult<()> {
        let db = self.db.lock().await;
        if let Some(path) = trigger.config.webhook_path.as_deref() {
            let owner: Option<String> = db
                .query_row(
                    "SELECT id FROM triggers WHERE webhook_path = ?1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()?;
            if owner.is_some_and(|id| id != trigger.id) {
                return Err(StoreError::DuplicateWebhookPath(path.to_string()));
            }
        }
        Self::write_trigger(&db, trigger)
    }

    async fn get_trigger(&self, id: &str) -> StoreResult<Option<Trigger>> {
        let db = self.db.lock().await;
        Ok(Self::query_triggers(&db, "SELECT doc FROM triggers WHERE id = ?1", &[&id])?
            .into_iter()
            .next())
    }

    async fn list_triggers(&self, kind: TriggerKind) -> StoreResult<Vec<Trigger>> {
        let db = self.db.lock().await;
        Self::query_triggers(
            &db,
            "SELECT doc FROM triggers WHERE kind = ?1",
            &[&kind.as_str()],
        )
    }

    async fn list_triggers_for_agent(&self, agent_id: &str) -> StoreResult<Vec<Trigger>> {
        let db = self.db.lock().await;
        Self::query_triggers(
            &db,
            "SELECT doc FROM triggers WHERE agent_id = ?1",
            &[&agent_id],
        )
    }

    async fn find_webhook_trigger(&self, path: &str) -> StoreResult<Option<Trigger>> {
        let db = self.db.lock().await;
        Ok(Self::query_triggers(
            &db,
            "SELECT doc FROM triggers WHERE kind = 'webhook' AND webhook_path = ?1",
            &[&path],
        )?
        .into_iter()
        .next())
    }

    async fn delete_triggers_for_agent(&self, agent_id: &str) -> StoreResult<usize> {
        let db = self.db.lock().await;
        Ok(db.execute(
            "DELETE FROM triggers WHERE agent_id = ?1",
            params![agent_id],
        )?)
    }

    async fn mark_triggered(&self, trigger_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let db = self.db.lock().await;
        let doc: Option<String> = db
            .query_row(
                "SELECT doc FROM triggers WHERE id = ?1",
                params![trigger_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(doc) = doc {
            let mut trigger: Trigger = serde_json::from_str(&doc)?;
            trigger.last_triggered_at = Some(at);
            Self::write_trigger(&db, &trigger)?;
        }
        Ok(())
    }
}
