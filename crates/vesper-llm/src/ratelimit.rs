//! Optional inter-call spacing for upstream APIs.
//!
//! Some gateways respond with 502s under bursty traffic; spacing calls per
//! `(base_url, model)` pair avoids that. The interval is read from
//! `LLM_MIN_INTERVAL` at call time and a non-positive value disables the
//! limiter entirely.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Environment variable holding the minimum interval between calls, seconds.
const MIN_INTERVAL_ENV: &str = "LLM_MIN_INTERVAL";

/// Process-wide inter-call rate limiter.
///
/// One instance is created at startup and shared by every HTTP client; the
/// timestamp map is guarded by a single async mutex. Holding the lock across
/// the sleep intentionally serialises callers of the same key.
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_call: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// Create a new limiter.
    pub fn new() -> Self {
        Self::default()
    }

    fn min_interval() -> Duration {
        let secs = std::env::var(MIN_INTERVAL_ENV)
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        if secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Wait until `key` is allowed to issue its next call.
    pub async fn wait(&self, key: &str) {
        let min_interval = Self::min_interval();
        if min_interval.is_zero() {
            return;
        }

        let mut map = self.last_call.lock().await;
        if let Some(last) = map.get(key) {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        map.insert(key.to_string(), Instant::now());
    }
}
