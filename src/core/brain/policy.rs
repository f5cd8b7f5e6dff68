//! Completion policy for unattended runs whose prompt asks for an email.
//!
//! The run only counts as done once an email-capable tool has succeeded after
//! the last data-collecting tool call.

use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;

use super::decision::ToolDecision;
use crate::core::tools::ToolDescriptor;

static EMAIL_ADDRESS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").ok());

const RECIPIENT_KEYS: [&str; 4] = ["to", "recipient", "email", "address"];

pub fn is_email_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("email") || lower.contains("mail")
}

fn prompt_requires_email(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    lower.contains("email") || lower.contains("e-mail")
}

fn first_address(text: &str) -> Option<String> {
    EMAIL_ADDRESS
        .as_ref()?
        .find(text)
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailPolicy {
    tool: String,
    prompt_recipient: Option<String>,
    seen_recipient: Option<String>,
    last_data_call: Option<usize>,
    last_email_call: Option<usize>,
    collected: Vec<String>,
    calls: usize,
}

impl EmailPolicy {
    /// Active when the prompt mentions email and the catalog has a tool that can send one.
    /// A tool with "send" in its name is preferred.
    pub fn detect(prompt: &str, catalog: &[ToolDescriptor]) -> Option<Self> {
        if !prompt_requires_email(prompt) {
            return None;
        }
        let candidates: Vec<&ToolDescriptor> =
            catalog.iter().filter(|t| is_email_tool(&t.name)).collect();
        let tool = candidates
            .iter()
            .find(|t| t.name.to_lowercase().contains("send"))
            .or_else(|| candidates.first())?;
        Some(Self {
            tool: tool.name.clone(),
            prompt_recipient: first_address(prompt),
            seen_recipient: None,
            last_data_call: None,
            last_email_call: None,
            collected: Vec::new(),
            calls: 0,
        })
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Record a successful tool call and its summarized result.
    pub fn record_success(&mut self, call: &ToolDecision, summary: &str) {
        self.calls += 1;
        self.observe_args(&call.args);
        if is_email_tool(&call.target) {
            self.last_email_call = Some(self.calls);
        } else {
            self.last_data_call = Some(self.calls);
            self.collected.push(format!("{}: {}", call.target, summary));
        }
    }

    /// Failed calls still reveal recipients the model meant to use.
    pub fn record_failure(&mut self, call: &ToolDecision) {
        self.observe_args(&call.args);
    }

    fn observe_args(&mut self, args: &Value) {
        if self.seen_recipient.is_some() {
            return;
        }
        for key in RECIPIENT_KEYS {
            if let Some(found) = args.get(key).and_then(Value::as_str).and_then(first_address) {
                self.seen_recipient = Some(found);
                return;
            }
        }
    }

    pub fn is_satisfied(&self) -> bool {
        match (self.last_email_call, self.last_data_call) {
            (Some(email), Some(data)) => email > data,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn recipient(&self) -> Option<&str> {
        self.prompt_recipient
            .as_deref()
            .or(self.seen_recipient.as_deref())
    }

    /// Corrective message sent when the model tries to stop early.
    pub fn reminder(&self) -> String {
        let to = self
            .recipient()
            .map(|r| format!(" to {}", r))
            .unwrap_or_default();
        format!(
            "You have not finished. Your task requires sending an email{}. \
             Call the `{}` tool now with the collected results. \
             Respond ONLY with the JSON decision: \
             {{\"type\": \"tool\", \"target\": \"{}\", \"args\": {{...}}}}",
            to, self.tool, self.tool
        )
    }

    /// The one best-effort send made after the loop ran out of turns.
    pub fn forced_call(&self, agent_name: &str, last_reply: &str) -> ToolDecision {
        let mut body = String::new();
        if !self.collected.is_empty() {
            body.push_str(&self.collected.join("\n\n"));
        }
        let reply = last_reply.trim();
        if !reply.is_empty() {
            if !body.is_empty() {
                body.push_str("\n\n");
            }
            body.push_str(reply);
        }
        if body.is_empty() {
            body.push_str("The scheduled run finished without collecting any results.");
        }

        let mut args = json!({
            "subject": format!("{} report", agent_name),
            "body": body,
        });
        if let (Some(to), Some(obj)) = (self.recipient(), args.as_object_mut()) {
            obj.insert("to".to_string(), Value::String(to.to_string()));
        }
        ToolDecision {
            target: self.tool.clone(),
            args,
        }
    }
}
