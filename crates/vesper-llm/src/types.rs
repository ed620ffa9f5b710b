//! Request and response types for the chat client.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use vesper_types::ToolCallRequest;

// ─────────────────────────────────────────────────────────────────────────────
// Tool definitions
// ─────────────────────────────────────────────────────────────────────────────

/// A tool exposed to the model: name, prompt description and argument schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Free-text description shown to the model.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Chat-completions wire form: `{"type":"function","function":{...}}`.
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Tool-choice strategy for a single model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides whether to call tools.
    Auto,
    /// The model must call at least one tool.
    Required,
    /// Tool calls are disabled.
    None,
}

impl ToolChoice {
    /// Wire string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Required => "required",
            Self::None => "none",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Options & response
// ─────────────────────────────────────────────────────────────────────────────

/// Per-call options for [`crate::ChatClient::chat`].
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Tools to expose, if any.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Tool-choice strategy; backend default when absent.
    pub tool_choice: Option<ToolChoice>,
    /// Sampling temperature; backend default when absent.
    pub temperature: Option<f32>,
    /// Override the profile's model name for this call.
    pub override_model: Option<String>,
}

impl ChatOptions {
    /// Options exposing the given tools.
    pub fn with_tools(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools: Some(tools),
            ..Default::default()
        }
    }

    /// Set the tool-choice strategy.
    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A turn-synchronous model response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Assistant text content, possibly empty.
    pub content: String,
    /// Tool calls requested by the model, in order.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatResponse {
    /// A plain text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// A response carrying tool calls.
    pub fn with_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }

    /// Whether the model requested any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
