//! Typed errors for the places where callers branch on the failure kind.
//! Everything else flows through `anyhow::Result`.

use thiserror::Error;

/// Failure while resolving or invoking a tool.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Tool '{name}' not found. Available: [{}]", available.join(", "))]
    NotFound {
        name: String,
        available: Vec<String>,
    },

    #[error("Tool '{name}' is not permitted for this agent. Permitted: [{}]", permitted.join(", "))]
    NotPermitted {
        name: String,
        permitted: Vec<String>,
    },

    #[error("Tool '{name}' requires the '{integration}' integration, which is not enabled for this agent")]
    MissingIntegration { name: String, integration: String },

    #[error("Tool '{name}' failed: {message}")]
    Invocation { name: String, message: String },

    #[error("Tool '{name}' reported an error: {message}")]
    InBand { name: String, message: String },
}

/// Failure from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("webhook path '{0}' is already bound to another trigger")]
    DuplicateWebhookPath(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Failure while evaluating a trigger condition. Always treated as "no match".
#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("operator {op} expects {expected}")]
    BadOperand {
        op: &'static str,
        expected: &'static str,
    },

    #[error("invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("condition must be a JSON object")]
    NotAnObject,
}

/// How the Supervisor treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Worth retrying: timeouts, resets, rate limits, upstream unavailable.
    Transient,
    /// Retrying would not help.
    Fatal,
    /// Caller does not own the agent. Never retried.
    Unauthorized,
}

/// Failure surfaced by management operations.
#[derive(Debug, Error)]
pub enum ManageError {
    #[error("agent '{0}' is not owned by the caller")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
