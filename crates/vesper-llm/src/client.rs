//! The [`ChatClient`] trait and the mock implementation used in tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{LlmError, Result};
use crate::types::{ChatOptions, ChatResponse};
use vesper_types::Message;

// ─────────────────────────────────────────────────────────────────────────────
// ChatClient trait
// ─────────────────────────────────────────────────────────────────────────────

/// Turn-synchronous chat interface.
///
/// Implementations own retry and rate-limit behavior; callers see either a
/// final [`ChatResponse`] or a terminal error. This is the only layer of the
/// runtime that propagates errors upward - everywhere else failures are
/// normalised into result records.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Execute one chat call over the given transcript.
    async fn chat(&self, messages: Vec<Message>, options: ChatOptions) -> Result<ChatResponse>;

    /// Name of this client, for logging.
    fn name(&self) -> &str;
}

/// A client that can be shared across tasks.
pub type SharedClient = Arc<dyn ChatClient>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock client
// ─────────────────────────────────────────────────────────────────────────────

/// A recorded chat call, for assertions in tests.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The transcript sent to the model.
    pub messages: Vec<Message>,
    /// The options sent along.
    pub options: ChatOptions,
}

/// Deterministic chat client for tests.
///
/// Responses are returned in order; requests are logged for inspection.
/// Once the queue is exhausted further calls fail.
#[derive(Debug, Default)]
pub struct MockClient {
    responses: Mutex<Vec<Result<ChatResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockClient {
    /// Create a mock returning the given responses in order.
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock with a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![ChatResponse::text(text)])
    }

    /// Create a mock whose first call fails with the given error.
    pub fn failing(error: LlmError) -> Self {
        Self {
            responses: Mutex::new(vec![Err(error)]),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Append another scripted response.
    pub fn push(&self, response: ChatResponse) {
        self.responses.lock().unwrap().push(Ok(response));
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatClient for MockClient {
    async fn chat(&self, messages: Vec<Message>, options: ChatOptions) -> Result<ChatResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages,
            options,
        });

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::Backend(
                "MockClient: no more scripted responses".to_string(),
            ));
        }
        responses.remove(0)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
