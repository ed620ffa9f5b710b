//! OpenAI-compatible chat-completions client.
//!
//! Works against OpenAI itself or any compatible gateway via `base_url`.
//! Transient upstream failures (HTTP 502/503/429 and request timeouts) are
//! retried with exponential backoff; everything else fails fast.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde_json::{Value, json};

use crate::client::ChatClient;
use crate::error::{LlmError, Result, is_retryable};
use crate::ratelimit::RateLimiter;
use crate::types::{ChatOptions, ChatResponse};
use vesper_types::{Message, ToolCallRequest};

/// Default request timeout, seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Default retry budget for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default sampling temperature when the caller does not set one.
const DEFAULT_TEMPERATURE: f32 = 0.2;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the OpenAI-compatible client.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key; optional for local gateways.
    pub api_key: Option<String>,
    /// API base URL.
    pub base_url: String,
    /// Model name used when the call does not override it.
    pub model: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Retry budget for transient failures.
    pub max_retries: u32,
    /// Name of this client instance, for logging.
    pub name: String,
}

impl OpenAiConfig {
    /// Create a config for the given model, reading timeout/retry knobs from
    /// `API_REQUEST_TIMEOUT` and `API_MAX_RETRIES`.
    pub fn new(model: impl Into<String>) -> Self {
        let timeout_secs = std::env::var("API_REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let max_retries = std::env::var("API_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
            name: "openai".to_string(),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the client name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff on transient errors.
///
/// Backoff for attempt `n` is `2^n` seconds. Non-retryable errors return
/// immediately.
pub async fn with_retry<F, Fut, T>(max_retries: u32, client_name: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                last_error = Some(e);

                if attempt < max_retries {
                    let backoff = Duration::from_secs(1u64 << attempt);
                    tracing::warn!(
                        client = client_name,
                        attempt = attempt + 1,
                        max_retries,
                        backoff_secs = backoff.as_secs(),
                        "transient upstream failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    Err(last_error.unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible chat client.
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
    limiter: Arc<RateLimiter>,
}

impl OpenAiClient {
    /// Create a new client with the given configuration and shared limiter.
    pub fn new(config: OpenAiConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn limiter_key(&self, model: &str) -> String {
        format!("{}:{}", self.config.base_url, model)
    }

    fn build_payload(&self, messages: &[Message], options: &ChatOptions, model: &str) -> Value {
        let mut payload = json!({
            "model": model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        });

        if let Some(ref tools) = options.tools
            && !tools.is_empty()
        {
            payload["tools"] = Value::Array(tools.iter().map(|t| t.to_wire()).collect());
            if let Some(choice) = options.tool_choice {
                payload["tool_choice"] = Value::String(choice.as_str().to_string());
            }
        }

        payload
    }

    async fn send_once(&self, payload: &Value) -> Result<ChatResponse> {
        let mut request = self
            .client
            .post(self.completions_url())
            .header(header::CONTENT_TYPE, "application/json");

        if let Some(ref key) = self.config.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request.json(payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = parse_error_message(&body).unwrap_or(body);
            return Err(match status {
                StatusCode::UNAUTHORIZED => LlmError::Auth(message),
                StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimit(message),
                s => LlmError::Upstream {
                    status: s.as_u16(),
                    message,
                },
            });
        }

        let body: WireResponse = response.json().await?;
        Ok(body.into())
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn chat(&self, messages: Vec<Message>, options: ChatOptions) -> Result<ChatResponse> {
        let model = options
            .override_model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());

        self.limiter.wait(&self.limiter_key(&model)).await;

        let payload = self.build_payload(&messages, &options, &model);

        tracing::debug!(
            client = %self.config.name,
            model = %model,
            messages = messages.len(),
            tools = options.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "sending chat-completions request"
        );

        with_retry(self.config.max_retries, &self.config.name, || {
            self.send_once(&payload)
        })
        .await
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

fn parse_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(String::from)
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, serde::Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallRequest>>,
}

impl From<WireResponse> for ChatResponse {
    fn from(resp: WireResponse) -> Self {
        let Some(choice) = resp.choices.into_iter().next() else {
            return ChatResponse::default();
        };
        ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
