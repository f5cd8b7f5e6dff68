use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use super::{Tool, ToolContext, ToolRegistry};

const MAX_BODY_CHARS: usize = 8000;

/// Registry with the tools every deployment ships.
pub fn default_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CurrentTime));
    registry.register(Arc::new(HttpRequest::new(Duration::from_secs(30))?));
    Ok(registry)
}

pub struct CurrentTime;

#[async_trait]
impl Tool for CurrentTime {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Current UTC date and time"
    }

    async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
        let now = chrono::Utc::now();
        Ok(json!({
            "utc": now.to_rfc3339(),
            "unix": now.timestamp(),
        }))
    }
}

pub struct HttpRequest {
    client: Client,
}

impl HttpRequest {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl Tool for HttpRequest {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Fetch a URL with GET or POST and return the status and body"
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string", "enum": ["GET", "POST"] },
                "body": {},
                "headers": { "type": "object" }
            },
            "required": ["url"]
        })
    }

    async fn invoke(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing 'url' argument"))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("only http(s) URLs are supported");
        }
        let method = args
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            other => bail!("unsupported method {}", other),
        };
        if let Some(headers) = args.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(name.as_str(), v);
                }
            }
        }
        match args.get("body") {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(body) if method == "POST" => request = request.json(body),
            _ => {}
        }

        let res = request.send().await?;
        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        let truncated = text.chars().count() > MAX_BODY_CHARS;
        let body: String = text.chars().take(MAX_BODY_CHARS).collect();
        Ok(json!({
            "status": status,
            "body": body,
            "truncated": truncated,
        }))
    }
}
