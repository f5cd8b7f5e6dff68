//! Structured decisions recovered from free-form model output.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::core::agent::ScheduleSpec;

/// One turn's structured intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Decision {
    Tool(ToolDecision),
    Agent(AgentDecision),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDecision {
    pub target: String,
    #[serde(default = "empty_object")]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    pub target: String,
    #[serde(default)]
    pub args: AgentArgs,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentArgs {
    #[serde(default)]
    pub input: String,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Decision {
    pub fn target(&self) -> &str {
        match self {
            Decision::Tool(t) => &t.target,
            Decision::Agent(a) => &a.target,
        }
    }
}

/// Result of trying to read a decision out of a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    Act(Decision),
    /// Plain-language reply; the model chose not to act.
    NoDecision,
}

static TRAILING_COMMA: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").ok());
static BARE_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_\-]*)\s*:").ok());

pub fn recover(text: &str) -> Recovery {
    match recover_object(text).and_then(decision_from_object) {
        Some(decision) => Recovery::Act(decision),
        None => Recovery::NoDecision,
    }
}

/// Find one JSON object in `text`, repairing common model formatting slips.
///
/// Strict parse of the whole reply first, then a ```json fenced block, then the
/// slice between the first `{` and the last `}`. Each candidate is tried as-is,
/// then with trailing commas stripped, quotes normalized and bare keys quoted,
/// then through the JSON5 parser.
pub fn recover_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if let Some(obj) = parse_strict(trimmed) {
        return Some(obj);
    }

    let mut candidates = Vec::new();
    if let Some(block) = fenced_block(trimmed) {
        candidates.push(block);
    }
    if let Some(slice) = brace_slice(trimmed) {
        candidates.push(slice);
    }

    candidates.into_iter().find_map(|candidate| {
        let repaired = repair(candidate);
        parse_strict(candidate)
            .or_else(|| parse_strict(&repaired))
            .or_else(|| parse_lenient(candidate))
            .or_else(|| parse_lenient(&repaired))
    })
}

fn decision_from_object(mut obj: Map<String, Value>) -> Option<Decision> {
    let kind = obj.get("type")?.as_str()?.trim().to_lowercase();
    obj.insert("type".to_string(), Value::String(kind));
    if obj.get("args").is_some_and(Value::is_null) {
        obj.remove("args");
    }
    serde_json::from_value(Value::Object(obj)).ok()
}

fn parse_strict(s: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(s).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn parse_lenient(s: &str) -> Option<Map<String, Value>> {
    match json5::from_str::<Value>(s).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```json")? + 7;
    let end = text[start..].find("```")?;
    let block = text[start..start + end].trim();
    (!block.is_empty()).then_some(block)
}

fn brace_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn looks_single_quoted(s: &str) -> bool {
    let single = s.matches('\'').count();
    single > 0 && single > s.matches('"').count()
}

/// Best-effort textual repair of almost-JSON.
pub fn repair(candidate: &str) -> String {
    let mut out = match TRAILING_COMMA.as_ref() {
        Some(re) => re.replace_all(candidate, "$1").into_owned(),
        None => candidate.to_string(),
    };
    if looks_single_quoted(&out) {
        out = out.replace('\'', "\"");
    }
    if let Some(re) = BARE_KEY.as_ref() {
        out = re.replace_all(&out, "$1\"$2\":").into_owned();
    }
    out
}

/// A reply may carry `{"schedule": {...}}` to change the agent's own cadence.
pub fn extract_schedule(text: &str) -> Option<ScheduleSpec> {
    let obj = recover_object(text)?;
    let schedule = obj.get("schedule")?;
    if !schedule.is_object() {
        return None;
    }
    serde_json::from_value(schedule.clone()).ok()
}
