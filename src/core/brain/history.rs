//! Bounded conversation history and tool-result summaries.

use serde_json::{Map, Value};

use crate::core::llm::ChatMessage;

const ARRAY_PREVIEW: usize = 3;
const OBJECT_PREVIEW: usize = 5;

/// Message list that collapses to the first system message plus the most
/// recent `keep` messages whenever it grows past `cap`.
#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<ChatMessage>,
    cap: usize,
    keep: usize,
}

impl History {
    pub fn new(system: ChatMessage, cap: usize, keep: usize) -> Self {
        Self {
            messages: vec![system],
            cap: cap.max(2),
            keep: keep.clamp(1, cap.max(2) - 1),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.messages.len() > self.cap {
            let tail_start = self.messages.len() - self.keep;
            let mut collapsed = Vec::with_capacity(self.keep + 1);
            collapsed.push(self.messages[0].clone());
            collapsed.extend(self.messages.drain(tail_start..));
            self.messages = collapsed;
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Render a tool result for the conversation, shrinking it when its JSON form
/// exceeds `limit` characters.
pub fn summarize_result(value: &Value, limit: usize) -> String {
    let full = value.to_string();
    if full.chars().count() <= limit {
        return full;
    }
    let shrunk = shrink(value, 0).to_string();
    truncate_chars(&shrunk, limit)
}

fn shrink(value: &Value, depth: usize) -> Value {
    match value {
        Value::Array(items) if depth < 2 => {
            let preview: Vec<Value> = items
                .iter()
                .take(ARRAY_PREVIEW)
                .map(|v| shrink(v, depth + 1))
                .collect();
            if items.len() > ARRAY_PREVIEW {
                serde_json::json!({
                    "count": items.len(),
                    "first": preview,
                })
            } else {
                Value::Array(preview)
            }
        }
        Value::Object(map) if depth < 2 => {
            let mut out = Map::new();
            for (k, v) in map.iter().take(OBJECT_PREVIEW) {
                out.insert(k.clone(), shrink(v, depth + 1));
            }
            if map.len() > OBJECT_PREVIEW {
                out.insert(
                    "_omitted_keys".to_string(),
                    Value::from(map.len() - OBJECT_PREVIEW),
                );
            }
            Value::Object(out)
        }
        Value::String(s) if s.chars().count() > 500 => Value::String(truncate_chars(s, 500)),
        other => other.clone(),
    }
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...(truncated)");
    out
}
