//! Capability registry and dispatch.
//!
//! Tools are registered explicitly at startup into an ordered [`ToolRegistry`].
//! The [`ToolDispatcher`] resolves a [`ToolDecision`] by exact name, applies the
//! agent's permission filter, cleans the arguments and invokes the tool, turning
//! both thrown and in-band errors into a [`DispatchError`].

pub mod builtin;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::agent::ToolFilter;
use crate::core::brain::decision::ToolDecision;
use crate::error::DispatchError;

pub use builtin::default_registry;

/// Identity passed to every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub agent_id: String,
    pub user_id: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments. Only `properties` keys are shown to the model.
    fn parameter_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Integration the agent must have enabled to call this tool.
    fn integration(&self) -> Option<&str> {
        None
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value>;

    /// Simplified call shape without caller context. Tried once when `invoke` fails.
    async fn invoke_without_context(&self, _args: Value) -> Result<Value> {
        Err(anyhow!("no context-free call shape"))
    }
}

/// What the model sees about a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<String>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if let Some(slot) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            warn!("Replacing tool '{}'", tool.name());
            *slot = tool;
        } else {
            info!("Registered tool: {}", tool.name());
            self.tools.push(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools visible under `filter`, in registration order.
    pub fn catalog(&self, filter: &ToolFilter) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .filter(|t| is_visible(t.as_ref(), filter))
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: parameter_names(&t.parameter_schema()),
            })
            .collect()
    }
}

fn is_visible(tool: &dyn Tool, filter: &ToolFilter) -> bool {
    filter.permits_tool(tool.name())
        && tool
            .integration()
            .is_none_or(|i| filter.permits_integration(i))
}

fn parameter_names(schema: &Value) -> Vec<String> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

/// Render a catalog as the plain-text block embedded in prompts.
pub fn render_catalog(catalog: &[ToolDescriptor]) -> String {
    if catalog.is_empty() {
        return "(no tools available)\n".to_string();
    }
    let mut out = String::new();
    for tool in catalog {
        out.push_str(&format!(
            "- {}: {} (args: {})\n",
            tool.name,
            tool.description,
            if tool.parameters.is_empty() {
                "none".to_string()
            } else {
                tool.parameters.join(", ")
            }
        ));
    }
    out
}

#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Check that `name` exists and passes `filter`, without invoking it.
    pub fn resolve(&self, name: &str, filter: &ToolFilter) -> Result<&Arc<dyn Tool>, DispatchError> {
        let tool = self.registry.get(name).ok_or_else(|| DispatchError::NotFound {
            name: name.to_string(),
            available: self
                .registry
                .catalog(filter)
                .into_iter()
                .map(|d| d.name)
                .collect(),
        })?;
        if !filter.permits_tool(name) {
            return Err(DispatchError::NotPermitted {
                name: name.to_string(),
                permitted: filter.permitted_tools(),
            });
        }
        if let Some(integration) = tool.integration()
            && !filter.permits_integration(integration)
        {
            return Err(DispatchError::MissingIntegration {
                name: name.to_string(),
                integration: integration.to_string(),
            });
        }
        Ok(tool)
    }

    pub async fn dispatch(
        &self,
        call: &ToolDecision,
        filter: &ToolFilter,
        ctx: &ToolContext,
    ) -> Result<Value, DispatchError> {
        let tool = self.resolve(&call.target, filter)?;
        let args = clean_args(call.args.clone());
        info!(agent = %ctx.agent_id, "Invoking tool {} with args {}", call.target, args);

        let output = match tool.invoke(args.clone(), ctx).await {
            Ok(value) => value,
            Err(primary) => match tool.invoke_without_context(args).await {
                Ok(value) => value,
                Err(_) => {
                    return Err(DispatchError::Invocation {
                        name: call.target.clone(),
                        message: primary.to_string(),
                    });
                }
            },
        };

        if let Some(message) = in_band_error(&output) {
            return Err(DispatchError::InBand {
                name: call.target.clone(),
                message,
            });
        }
        Ok(output)
    }
}

/// Drop null members so tools only see JSON they can act on.
pub fn clean_args(args: Value) -> Value {
    match args {
        Value::Null => Value::Object(Default::default()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, clean_nested(v)))
                .collect(),
        ),
        other => other,
    }
}

fn clean_nested(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, clean_nested(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(clean_nested).collect()),
        other => other,
    }
}

/// Detect errors a capability reported as data rather than as a failure.
pub fn in_band_error(output: &Value) -> Option<String> {
    match output {
        Value::String(s) if s.trim_start().to_lowercase().starts_with("error") => {
            Some(s.trim().to_string())
        }
        Value::Object(map) => {
            match map.get("error") {
                None | Some(Value::Null) | Some(Value::Bool(false)) => {}
                Some(Value::String(s)) if s.is_empty() => {}
                Some(Value::String(s)) => return Some(s.clone()),
                Some(other) => return Some(other.to_string()),
            }
            if map.get("success") == Some(&Value::Bool(false)) {
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("tool reported success=false");
                return Some(message.to_string());
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests;
