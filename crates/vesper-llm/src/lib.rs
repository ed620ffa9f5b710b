//! Chat-completions client abstraction for the Vesper runtime.
//!
//! The agent loop talks to models through the [`ChatClient`] trait. The
//! default implementation is an OpenAI-compatible HTTP client with retry,
//! backoff and optional inter-call rate limiting; the [`MockClient`] serves
//! deterministic tests. Model selection goes through [`ModelManager`], which
//! resolves pointer names (`main`, `compact`, `quick`, ...) to configured
//! profiles.

pub mod client;
pub mod error;
pub mod manager;
pub mod openai;
pub mod ratelimit;
pub mod types;

pub use client::{ChatClient, MockClient, SharedClient};
pub use error::{LlmError, Result, is_retryable};
pub use manager::{ModelManager, ModelProfile};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use ratelimit::RateLimiter;
pub use types::{ChatOptions, ChatResponse, ToolChoice, ToolDefinition};
