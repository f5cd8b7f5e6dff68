pub mod generic_provider;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub use generic_provider::OpenAiCompatProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    // Execute a prompt against a model using a structured conversation history
    async fn generate(&self, model_id: &str, messages: &[ChatMessage]) -> Result<String>;
}

/// Resolves which model an agent talks to and forwards the call to the provider.
#[derive(Clone)]
pub struct LlmManager {
    provider: Arc<dyn LlmProvider>,
    default_model: String,
}

impl LlmManager {
    pub fn new(provider: Arc<dyn LlmProvider>, default_model: impl Into<String>) -> Self {
        let default_model = default_model.into();
        info!(
            "Registered LLM Provider: {} (default model {})",
            provider.provider_id(),
            default_model
        );
        Self {
            provider,
            default_model,
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    /// Generate with the agent's model, falling back to the default when unset or blank.
    pub async fn generate(&self, model: Option<&str>, messages: &[ChatMessage]) -> Result<String> {
        let model_id = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);
        self.provider.generate(model_id, messages).await
    }
}
