//! Error types for the agent crate.

use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
///
/// Most failures inside the loop are normalised into tool result records and
/// never surface here; this type covers the cases that genuinely end a run.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Model client failure after retries.
    #[error("LLM error: {0}")]
    Llm(#[from] vesper_llm::LlmError),

    /// Memory persistence or compaction plumbing failure.
    #[error("memory error: {0}")]
    Memory(#[from] vesper_memory::MemoryError),

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] vesper_store::StoreError),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Tool-level failure that could not be represented as a result.
    #[error("tool error: {0}")]
    Tool(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Create a tool error.
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
