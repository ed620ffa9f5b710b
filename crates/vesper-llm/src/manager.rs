//! Model profiles and pointer resolution.
//!
//! The runtime addresses models through pointer names (`main`, `compact`,
//! `quick`, `task` and the per-sub-agent pointers). Each pointer resolves to
//! a [`ModelProfile`] loaded from environment groups such as `MAIN_MODEL` /
//! `MAIN_API_KEY` / `MAIN_BASE_URL` / `MAIN_CONTEXT_LENGTH`. Unknown
//! pointers fall back to `main`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::SharedClient;
use crate::error::Result;
use crate::openai::{OpenAiClient, OpenAiConfig};
use crate::ratelimit::RateLimiter;

/// Default context window when a profile does not configure one.
const DEFAULT_CONTEXT_LENGTH: usize = 200_000;

/// The pointer every unknown pointer falls back to.
const MAIN_POINTER: &str = "main";

/// Profile groups loaded from the environment: `(pointer, env prefix,
/// fallback model)`.
const PROFILE_GROUPS: &[(&str, &str, &str)] = &[
    ("main", "MAIN", "gpt-4o"),
    ("compact", "COMPACT", "gpt-4o-mini"),
    ("quick", "QUICK", "gpt-4o-mini"),
    ("task", "TASK", "gpt-4o-mini"),
    ("search_agent", "SEARCH_AGENT", "gpt-4o-mini"),
    ("browser_agent", "BROWSER_AGENT", "gpt-4o-mini"),
    ("windows_agent", "WINDOWS_AGENT", "gpt-4o-mini"),
];

// ─────────────────────────────────────────────────────────────────────────────
// Profile
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration of one model pointer.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    /// Pointer name.
    pub name: String,
    /// Model identifier sent to the API.
    pub model: String,
    /// API key; falls back to `OPENAI_API_KEY` when absent.
    pub api_key: Option<String>,
    /// Base URL; falls back to `OPENAI_BASE_URL` when absent.
    pub base_url: Option<String>,
    /// Context window size in tokens, used by the compaction threshold.
    pub context_length: usize,
}

impl ModelProfile {
    /// A profile with the given name and model, default context length.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            api_key: None,
            base_url: None,
            context_length: DEFAULT_CONTEXT_LENGTH,
        }
    }

    /// Set the context length.
    pub fn with_context_length(mut self, context_length: usize) -> Self {
        self.context_length = context_length;
        self
    }

    fn from_env(pointer: &str, prefix: &str, fallback_model: &str) -> Self {
        let var = |suffix: &str| std::env::var(format!("{prefix}_{suffix}")).ok();
        Self {
            name: pointer.to_string(),
            model: var("MODEL").unwrap_or_else(|| fallback_model.to_string()),
            api_key: var("API_KEY"),
            base_url: var("BASE_URL"),
            context_length: var("CONTEXT_LENGTH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CONTEXT_LENGTH),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves model pointers to profiles and chat clients.
///
/// Built once at startup and injected into the loop and the tools; tests
/// replace individual clients with mocks via [`ModelManager::register_client`].
pub struct ModelManager {
    profiles: HashMap<String, ModelProfile>,
    clients: HashMap<String, SharedClient>,
    limiter: Arc<RateLimiter>,
}

impl ModelManager {
    /// Load all profile groups from the environment and build their clients.
    pub fn from_env() -> Result<Self> {
        let profiles: HashMap<String, ModelProfile> = PROFILE_GROUPS
            .iter()
            .map(|(pointer, prefix, fallback)| {
                (
                    pointer.to_string(),
                    ModelProfile::from_env(pointer, prefix, fallback),
                )
            })
            .collect();
        Self::from_profiles(profiles)
    }

    /// Build a manager from explicit profiles, constructing HTTP clients.
    pub fn from_profiles(profiles: HashMap<String, ModelProfile>) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new());
        let mut clients = HashMap::new();

        for (pointer, profile) in &profiles {
            let api_key = profile
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            let base_url = profile
                .base_url
                .clone()
                .or_else(|| std::env::var("OPENAI_BASE_URL").ok());

            let mut config = OpenAiConfig::new(&profile.model).with_name(pointer.clone());
            if let Some(key) = api_key {
                config = config.with_api_key(key);
            }
            if let Some(url) = base_url {
                config = config.with_base_url(url);
            }

            let client: SharedClient = Arc::new(OpenAiClient::new(config, Arc::clone(&limiter))?);
            clients.insert(pointer.clone(), client);
        }

        Ok(Self {
            profiles,
            clients,
            limiter,
        })
    }

    /// An empty manager for tests; register mock clients and profiles onto it.
    pub fn for_testing() -> Self {
        Self {
            profiles: HashMap::new(),
            clients: HashMap::new(),
            limiter: Arc::new(RateLimiter::new()),
        }
    }

    /// Replace (or install) the client behind a pointer.
    pub fn register_client(&mut self, pointer: impl Into<String>, client: SharedClient) {
        self.clients.insert(pointer.into(), client);
    }

    /// Replace (or install) the profile behind a pointer.
    pub fn register_profile(&mut self, profile: ModelProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    /// Resolve a pointer to its profile, falling back to `main`.
    pub fn profile(&self, pointer: &str) -> ModelProfile {
        self.profiles
            .get(pointer)
            .or_else(|| self.profiles.get(MAIN_POINTER))
            .cloned()
            .unwrap_or_else(|| ModelProfile::new(MAIN_POINTER, "gpt-4o"))
    }

    /// Resolve a pointer to its chat client, falling back to `main`.
    pub fn client(&self, pointer: &str) -> Option<SharedClient> {
        self.clients
            .get(pointer)
            .or_else(|| self.clients.get(MAIN_POINTER))
            .cloned()
    }

    /// The shared rate limiter.
    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("profiles", &self.profiles.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
