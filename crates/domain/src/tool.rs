//! Tool-call contracts shared by the dispatcher, the orchestrator, and the
//! provider adapter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// The unit of observability for one tool invocation. For grouped calls the
/// label carries a `×N` suffix and the duration is the group average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallInfo {
    pub name: String,
    pub label: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A classified tool failure. Handlers raise this (never bare strings); the
/// dispatcher folds it into the function response as `{error, code?}`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
    pub code: Option<String>,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        ToolError {
            message: message.into(),
            code: None,
        }
    }

    pub fn coded(code: impl Into<String>, message: impl Into<String>) -> Self {
        ToolError {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::coded("validation", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::coded("not_found", message)
    }
}

impl From<Error> for ToolError {
    fn from(err: Error) -> Self {
        match &err {
            Error::Validation(m) => ToolError::validation(m.clone()),
            Error::NotFound(m) => ToolError::not_found(m.clone()),
            Error::Upstream(m) => ToolError::coded("upstream", m.clone()),
            Error::Timeout(_) => ToolError::coded("timeout", "timed out"),
            Error::Cancelled => ToolError::coded("cancelled", "cancelled"),
            _ => ToolError::new(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_serializes_camel_case_and_omits_empty() {
        let info = ToolCallInfo {
            name: "get_profile".into(),
            label: "Fetching profile".into(),
            duration_ms: 42,
            cache_hit: Some(true),
            error: None,
        };
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["durationMs"], 42);
        assert_eq!(v["cacheHit"], true);
        assert!(v.get("error").is_none());
    }

    #[test]
    fn timeout_classifies_with_stable_message() {
        let te: ToolError = Error::Timeout("actor call".into()).into();
        assert_eq!(te.code.as_deref(), Some("timeout"));
        assert_eq!(te.message, "timed out");
    }
}
