//! Wires the subsystems together once per process.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::core::agent::{AgentDirectory, AgentManager, AgentStore, MemoryStore, SqliteStore};
use crate::core::brain::DecisionLoop;
use crate::core::delegation::DelegationRouter;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::llm::{LlmManager, LlmProvider, OpenAiCompatProvider};
use crate::core::scheduler::{CronJobQueue, JobQueue, QueueWorker, QueuedJob};
use crate::core::supervisor::{Supervisor, SupervisorJobHandler};
use crate::core::tools::{ToolDispatcher, ToolRegistry, default_registry};
use crate::core::triggers::TriggerEngine;

/// Every long-lived service, built once and shared by reference.
pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<dyn AgentStore>,
    pub queue: Arc<dyn JobQueue>,
    pub supervisor: Arc<Supervisor>,
    pub manager: Arc<AgentManager>,
    pub triggers: Arc<TriggerEngine>,
    pub delegation: Arc<DelegationRouter>,
}

impl Runtime {
    /// Build from explicit collaborators. Used directly by tests and embedding hosts.
    pub fn assemble(
        config: AppConfig,
        store: Arc<dyn AgentStore>,
        queue: Arc<dyn JobQueue>,
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let llm = LlmManager::new(provider, config.llm.default_model.clone());
        let brain = DecisionLoop::new(llm, ToolDispatcher::new(registry), config.runner.clone());
        let supervisor = Arc::new(Supervisor::new(
            store.clone(),
            brain,
            queue.clone(),
            &config.runner,
        ));
        let directory: Arc<dyn AgentDirectory> = supervisor.clone();
        Self {
            manager: Arc::new(AgentManager::new(store.clone(), queue.clone())),
            triggers: Arc::new(TriggerEngine::new(store.clone())),
            delegation: Arc::new(DelegationRouter::new(
                store.clone(),
                directory,
                &config.delegation,
            )),
            supervisor,
            store,
            queue,
            config,
        }
    }

    /// Production wiring: SQLite or in-memory store, cron-backed queue, HTTP model provider.
    /// The returned receiver carries fired jobs to the worker.
    pub async fn from_config(config: AppConfig) -> Result<(Self, mpsc::Receiver<QueuedJob>)> {
        let store: Arc<dyn AgentStore> = match &config.storage.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                info!("Using SQLite store at {}", path.display());
                Arc::new(SqliteStore::open(path)?)
            }
            None => {
                info!("No storage path configured, agents are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };
        let (tx, rx) = mpsc::channel(config.queue.channel_capacity.max(1));
        let queue: Arc<dyn JobQueue> = Arc::new(CronJobQueue::start(tx).await?);
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::from_config(&config.llm)?);
        let registry = Arc::new(default_registry()?);
        Ok((Self::assemble(config, store, queue, provider, registry), rx))
    }

    pub fn directory(&self) -> Arc<dyn AgentDirectory> {
        self.supervisor.clone()
    }

    pub fn worker(&self, receiver: mpsc::Receiver<QueuedJob>) -> QueueWorker {
        QueueWorker::new(
            receiver,
            Arc::new(SupervisorJobHandler::new(self.supervisor.clone())),
            self.config.queue.max_deliveries,
            Duration::from_millis(self.config.queue.redelivery_delay_ms),
        )
    }
}

/// Lifecycle component owning the queue worker: re-arms persisted schedules on
/// start, closes the queue on shutdown.
pub struct QueueService {
    runtime: Arc<Runtime>,
    receiver: Option<mpsc::Receiver<QueuedJob>>,
    worker: Option<JoinHandle<()>>,
}

impl QueueService {
    pub fn new(runtime: Arc<Runtime>, receiver: mpsc::Receiver<QueuedJob>) -> Self {
        Self {
            runtime,
            receiver: Some(receiver),
            worker: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for QueueService {
    async fn on_start(&mut self) -> Result<()> {
        let armed = self.runtime.manager.rearm_all().await?;
        info!("Re-armed {} persisted schedule(s)", armed);
        if let Some(receiver) = self.receiver.take() {
            let worker = self.runtime.worker(receiver);
            self.worker = Some(tokio::spawn(worker.run()));
        }
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        if let Err(e) = self.runtime.queue.close().await {
            warn!("Queue close failed: {}", e);
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        info!("Queue service stopped");
        Ok(())
    }
}
