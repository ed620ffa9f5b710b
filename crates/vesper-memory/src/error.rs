//! Error types for the memory crate.

use thiserror::Error;

/// Result type alias using the memory error type.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Error type for memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Filesystem failure during persist/load.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Model client failure during compaction.
    #[error("LLM error: {0}")]
    Llm(#[from] vesper_llm::LlmError),
}
