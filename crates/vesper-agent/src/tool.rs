//! Tool framework.
//!
//! A [`Tool`] is a named capability with a JSON-schema argument definition and an
//! async execution entry point. Execution never raises across the loop
//! boundary: every failure mode is normalised into a [`ToolOutput`] record so
//! the iteration can continue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vesper_llm::ToolDefinition;

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Classification of a failed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// No tool registered under the requested name.
    UnknownTool,
    /// The arguments were not valid JSON.
    ArgumentParseError,
    /// The call exceeded its deadline.
    Timeout,
    /// The tool executed but failed.
    ToolFailure,
    /// The call was deferred by the sub-agent's heavy-call budget.
    Throttled,
}

/// Result record of one tool execution, serialised into the tool message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the call failed.
    pub error: bool,
    /// Failure classification, absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolErrorKind>,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured payload. Tools MAY include `_summary`, `file_id` or
    /// `screenshot_file_id` keys to cooperate with truncation and
    /// artifact harvesting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolOutput {
    /// A successful result carrying data.
    pub fn ok(data: Value) -> Self {
        Self {
            error: false,
            kind: None,
            message: None,
            data: Some(data),
        }
    }

    /// A successful result with a message and data.
    pub fn ok_with_message(message: impl Into<String>, data: Value) -> Self {
        Self {
            error: false,
            kind: None,
            message: Some(message.into()),
            data: Some(data),
        }
    }

    /// A failed result.
    pub fn failure(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: true,
            kind: Some(kind),
            message: Some(message.into()),
            data: None,
        }
    }

    /// Serialise into the tool message body.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":true}"#.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────────────────────────────────────

/// A named capability exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Free-text description used for model prompting.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Execute the tool. `session_id` scopes per-session state such as the
    /// TODO list.
    async fn execute(&self, args: Value, session_id: &str) -> ToolOutput;

    /// The chat-completions definition for this tool.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_output_serializes_without_error_fields() {
        let out = ToolOutput::ok(json!({"x": 1}));
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["error"], false);
        assert!(json.get("kind").is_none());
        assert_eq!(json["data"]["x"], 1);
    }

    #[test]
    fn failure_output_carries_kind() {
        let out = ToolOutput::failure(ToolErrorKind::Timeout, "too slow");
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["error"], true);
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["message"], "too slow");
    }

    #[test]
    fn output_roundtrips() {
        let out = ToolOutput::failure(ToolErrorKind::ArgumentParseError, "bad json");
        let back: ToolOutput = serde_json::from_str(&out.to_json_string()).unwrap();
        assert!(back.error);
        assert_eq!(back.kind, Some(ToolErrorKind::ArgumentParseError));
    }
}
