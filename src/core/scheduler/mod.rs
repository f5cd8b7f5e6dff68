//! Recurring queue entries for agent schedules, and the worker that drains them.
//!
//! Every scheduled agent owns entries named `agent-<id>` with keys of the form
//! `agent-<id>:<uuid>`. Arming a schedule always clears the agent's existing
//! entries first, so at most one entry per agent is live.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::agent::{AgentRecord, Repeat};

pub fn job_name(agent_id: &str) -> String {
    format!("agent-{}", agent_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub agent_id: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringJob {
    pub name: String,
    pub data: JobData,
    pub repeat: Repeat,
}

impl RecurringJob {
    pub fn for_agent(agent: &AgentRecord, repeat: Repeat) -> Self {
        Self {
            name: job_name(&agent.id),
            data: JobData {
                agent_id: agent.id.clone(),
                owner_id: agent.owner_id.clone(),
            },
            repeat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecurringEntry {
    pub key: String,
    #[serde(flatten)]
    pub job: RecurringJob,
}

impl RecurringEntry {
    /// Matches on the exact name or the `agent-<id>:` key prefix, so `agent-1`
    /// never claims `agent-12`'s entries.
    pub fn belongs_to(&self, agent_id: &str) -> bool {
        let name = job_name(agent_id);
        self.job.name == name
            || self
                .key
                .strip_prefix(name.as_str())
                .is_some_and(|rest| rest.starts_with(':'))
    }
}

/// One firing of a recurring entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub key: String,
    pub data: JobData,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Register a recurring entry and return its key.
    async fn add_recurring(&self, job: RecurringJob) -> Result<String>;
    async fn list_recurring(&self) -> Result<Vec<RecurringEntry>>;
    async fn remove_recurring(&self, key: &str) -> Result<bool>;
    async fn close(&self) -> Result<()>;
}

fn entry_key(job: &RecurringJob) -> String {
    format!("{}:{}", job.name, Uuid::new_v4().simple())
}

pub async fn entries_for_agent(queue: &dyn JobQueue, agent_id: &str) -> Result<Vec<RecurringEntry>> {
    Ok(queue
        .list_recurring()
        .await?
        .into_iter()
        .filter(|e| e.belongs_to(agent_id))
        .collect())
}

/// Remove every recurring entry that belongs to `agent_id`.
pub async fn unschedule_agent(queue: &dyn JobQueue, agent_id: &str) -> Result<usize> {
    let mut removed = 0;
    for entry in entries_for_agent(queue, agent_id).await? {
        if queue.remove_recurring(&entry.key).await? {
            removed += 1;
        }
    }
    if removed > 0 {
        info!(agent = %agent_id, "Removed {} recurring entr{}", removed, if removed == 1 { "y" } else { "ies" });
    }
    Ok(removed)
}

/// Replace the agent's recurring entries with one matching its current schedule.
pub async fn schedule_agent(queue: &dyn JobQueue, agent: &AgentRecord) -> Result<Option<String>> {
    let repeat = agent.schedule.effective();
    // A bad expression must not cost the agent the entries it already has.
    if let Some(Repeat::Cron(expr)) = &repeat {
        validate_cron(expr)?;
    }
    unschedule_agent(queue, &agent.id).await?;
    let Some(repeat) = repeat else {
        return Ok(None);
    };
    let key = queue
        .add_recurring(RecurringJob::for_agent(agent, repeat))
        .await?;
    info!(agent = %agent.id, "Armed recurring entry {}", key);
    Ok(Some(key))
}

/// Expand 5-field cron expressions to the 6-field seconds form the scheduler expects.
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse the expression the way the cron queue would, without scheduling anything.
pub fn validate_cron(expr: &str) -> Result<()> {
    let noop: FireFn = Box::new(|_uuid, _l| Box::pin(async {}));
    Job::new_async(normalize_cron(expr).as_str(), noop)
        .map(|_| ())
        .map_err(|e| anyhow!("Invalid cron expression '{}': {}", expr.trim(), e))
}

// ── In-process queue ──

/// Queue that keeps entries in memory and only fires when asked.
#[derive(Default)]
pub struct MemoryJobQueue {
    entries: Mutex<Vec<RecurringEntry>>,
    sender: Option<mpsc::Sender<QueuedJob>>,
    closed: AtomicBool,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(sender: mpsc::Sender<QueuedJob>) -> Self {
        Self {
            sender: Some(sender),
            ..Self::default()
        }
    }

    /// Deliver one firing of the entry at `key` to the worker channel.
    pub async fn fire(&self, key: &str) -> Result<bool> {
        let data = {
            let entries = self.entries.lock().await;
            match entries.iter().find(|e| e.key == key) {
                Some(entry) => entry.job.data.clone(),
                None => return Ok(false),
            }
        };
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("queue has no worker channel"))?;
        sender
            .send(QueuedJob {
                key: key.to_string(),
                data,
            })
            .await
            .map_err(|_| anyhow!("worker channel closed"))?;
        Ok(true)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn add_recurring(&self, job: RecurringJob) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("queue is closed");
        }
        let key = entry_key(&job);
        self.entries.lock().await.push(RecurringEntry {
            key: key.clone(),
            job,
        });
        Ok(key)
    }

    async fn list_recurring(&self) -> Result<Vec<RecurringEntry>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn remove_recurring(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.key != key);
        Ok(entries.len() < before)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.entries.lock().await.clear();
        Ok(())
    }
}

// ── Cron-backed queue ──

type FireFn = Box<
    dyn FnMut(Uuid, JobScheduler) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

fn enqueue_on_fire(sender: mpsc::Sender<QueuedJob>, key: String, data: JobData) -> FireFn {
    Box::new(move |_uuid, _l| {
        let sender = sender.clone();
        let job = QueuedJob {
            key: key.clone(),
            data: data.clone(),
        };
        Box::pin(async move {
            if let Err(e) = sender.send(job).await {
                warn!("Dropping fired job, worker channel closed: {}", e);
            }
        })
    })
}

struct CronEntry {
    key: String,
    job_id: Uuid,
    job: RecurringJob,
}

/// [`JobQueue`] backed by `tokio-cron-scheduler`. Fired entries go to a bounded channel.
pub struct CronJobQueue {
    scheduler: Mutex<JobScheduler>,
    entries: Mutex<Vec<CronEntry>>,
    sender: mpsc::Sender<QueuedJob>,
}

impl CronJobQueue {
    pub async fn start(sender: mpsc::Sender<QueuedJob>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        scheduler.start().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            entries: Mutex::new(Vec::new()),
            sender,
        })
    }
}

#[async_trait]
impl JobQueue for CronJobQueue {
    async fn add_recurring(&self, job: RecurringJob) -> Result<String> {
        let key = entry_key(&job);
        let fire = enqueue_on_fire(self.sender.clone(), key.clone(), job.data.clone());
        let cron_job = match &job.repeat {
            Repeat::Every(ms) => {
                if *ms == 0 {
                    bail!("repeat interval must be positive");
                }
                Job::new_repeated_async(Duration::from_millis(*ms), fire)?
            }
            Repeat::Cron(expr) => Job::new_async(normalize_cron(expr).as_str(), fire)
                .map_err(|e| anyhow!("Invalid cron expression '{}': {}", expr, e))?,
        };
        let job_id = self.scheduler.lock().await.add(cron_job).await?;
        self.entries.lock().await.push(CronEntry {
            key: key.clone(),
            job_id,
            job,
        });
        Ok(key)
    }

    async fn list_recurring(&self) -> Result<Vec<RecurringEntry>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .map(|e| RecurringEntry {
                key: e.key.clone(),
                job: e.job.clone(),
            })
            .collect())
    }

    async fn remove_recurring(&self, key: &str) -> Result<bool> {
        let removed = {
            let mut entries = self.entries.lock().await;
            match entries.iter().position(|e| e.key == key) {
                Some(idx) => entries.remove(idx),
                None => return Ok(false),
            }
        };
        self.scheduler.lock().await.remove(&removed.job_id).await?;
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.entries.lock().await.clear();
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

// ── Worker ──

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobData) -> Result<()>;
}

/// Drains fired jobs and hands each to the handler, redelivering failures.
pub struct QueueWorker {
    receiver: mpsc::Receiver<QueuedJob>,
    handler: Arc<dyn JobHandler>,
    max_deliveries: u32,
    redelivery_delay: Duration,
}

impl QueueWorker {
    pub fn new(
        receiver: mpsc::Receiver<QueuedJob>,
        handler: Arc<dyn JobHandler>,
        max_deliveries: u32,
        redelivery_delay: Duration,
    ) -> Self {
        Self {
            receiver,
            handler,
            max_deliveries: max_deliveries.max(1),
            redelivery_delay,
        }
    }

    /// Runs until every sender is dropped. Jobs are handled concurrently.
    pub async fn run(mut self) {
        info!("Queue worker started");
        while let Some(job) = self.receiver.recv().await {
            let handler = self.handler.clone();
            let max_deliveries = self.max_deliveries;
            let delay = self.redelivery_delay;
            tokio::spawn(async move {
                deliver(handler.as_ref(), &job, max_deliveries, delay).await;
            });
        }
        info!("Queue worker stopped");
    }
}

/// At-least-once delivery of a single job. Returns the number of deliveries made.
pub async fn deliver(
    handler: &dyn JobHandler,
    job: &QueuedJob,
    max_deliveries: u32,
    delay: Duration,
) -> u32 {
    for delivery in 1..=max_deliveries {
        match handler.handle(&job.data).await {
            Ok(()) => return delivery,
            Err(e) if delivery < max_deliveries => {
                warn!(agent = %job.data.agent_id, "Job {} delivery {} failed, redelivering: {}", job.key, delivery, e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(agent = %job.data.agent_id, "Job {} failed after {} deliveries: {}", job.key, delivery, e);
            }
        }
    }
    max_deliveries
}

#[cfg(test)]
mod tests;
