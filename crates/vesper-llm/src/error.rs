//! Error types for the LLM client layer.

use thiserror::Error;

/// Result type alias using the LLM error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Error type for chat client operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Configuration problem (missing key, bad env value).
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication rejected by the upstream service.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Upstream rate limit (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Upstream server failure.
    #[error("upstream error (HTTP {status}): {message}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body or error message.
        message: String,
    },

    /// Network-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else the backend reports.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Whether an error is transient and worth retrying with backoff.
///
/// Matches the upstream contract: HTTP 502/503, rate limits (429) and
/// network timeouts are retryable; everything else fails fast.
pub fn is_retryable(err: &LlmError) -> bool {
    match err {
        LlmError::RateLimit(_) | LlmError::Timeout(_) | LlmError::Network(_) => true,
        LlmError::Upstream { status, .. } => matches!(status, 502 | 503),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(is_retryable(&LlmError::RateLimit("slow down".into())));
        assert!(is_retryable(&LlmError::Timeout("600s".into())));
        assert!(is_retryable(&LlmError::Network("reset".into())));
        assert!(is_retryable(&LlmError::Upstream {
            status: 502,
            message: "bad gateway".into()
        }));
        assert!(is_retryable(&LlmError::Upstream {
            status: 503,
            message: "unavailable".into()
        }));
    }

    #[test]
    fn fatal_errors_are_not_retryable() {
        assert!(!is_retryable(&LlmError::Auth("bad key".into())));
        assert!(!is_retryable(&LlmError::Config("missing".into())));
        assert!(!is_retryable(&LlmError::Upstream {
            status: 400,
            message: "bad request".into()
        }));
    }
}
