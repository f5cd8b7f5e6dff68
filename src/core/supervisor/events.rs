use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::agent::RunMode;
use crate::error::RunErrorKind;

/// Lifecycle of one supervised run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        agent_id: String,
        mode: RunMode,
    },
    Retrying {
        agent_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    Completed {
        agent_id: String,
        attempts: u32,
    },
    Failed {
        agent_id: String,
        attempts: u32,
        error: String,
        kind: RunErrorKind,
    },
}

#[derive(Clone)]
pub struct RunEvents {
    tx: broadcast::Sender<RunEvent>,
}

impl RunEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget; having no subscribers is fine.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for RunEvents {
    fn default() -> Self {
        Self::new(256)
    }
}
