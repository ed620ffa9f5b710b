//! Per-session memory for the agent loop.
//!
//! A [`MemoryManager`] owns one session's transcript while a turn is running:
//! a short-term message list plus an optional mid-term summary that replaces
//! compacted history. When the estimated context size crosses the configured
//! share of the main model's window, the transcript is summarised through the
//! cheaper `compact` profile and trimmed to the most recent messages.

mod error;

pub use error::{MemoryError, Result};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use vesper_llm::{ChatOptions, ModelManager};
use vesper_types::{Message, Role};

/// Env knob for the compaction threshold as a share of the context window.
const AUTO_COMPACT_RATIO_ENV: &str = "AUTO_COMPACT_RATIO";

/// Default compaction ratio, also the fallback for out-of-range values.
const DEFAULT_COMPACT_RATIO: f64 = 0.92;

/// How many trailing messages survive a compaction verbatim.
const KEEP_RECENT: usize = 6;

/// Prompt appended to the context to request a structured summary.
/// The product targets Chinese-speaking users, so the summary is Chinese.
const COMPACT_PROMPT: &str = "请根据当前对话生成结构化中文摘要，保留：项目背景/关键信息/已完成/待办/注意事项，用于继续协作。输出应简洁、要点化。";

/// Placeholder summary recorded when the compact model returns nothing.
const COMPACT_FAILED_SUMMARY: &str = "(自动压缩失败：未能生成摘要)";

/// Label prefixed to the mid-term summary when building the context view.
const SUMMARY_LABEL: &str = "会话摘要：";

// ─────────────────────────────────────────────────────────────────────────────
// Persistence shape
// ─────────────────────────────────────────────────────────────────────────────

/// On-disk session document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Session id.
    pub session_id: String,
    /// ISO timestamp of the last persist.
    pub created_at: String,
    /// Mid-term summary, if any compaction has happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid_term_summary: Option<String>,
    /// The short-term transcript.
    pub messages: Vec<Message>,
}

/// Outcome of a compaction check, emitted as a `meta` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactOutcome {
    /// Whether a compaction pass ran and succeeded.
    pub compacted: bool,
    /// Estimated tokens at check time.
    pub tokens: usize,
    /// The threshold that triggers compaction.
    pub threshold: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Token estimation
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse token estimate: total content characters divided by four, min 1.
/// Only the compaction threshold depends on this, so precision is not a goal.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages.iter().map(|m| m.content_chars()).sum();
    (chars / 4).max(1)
}

fn auto_compact_ratio() -> f64 {
    let value = std::env::var(AUTO_COMPACT_RATIO_ENV)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(DEFAULT_COMPACT_RATIO);
    if value > 0.0 && value < 1.0 {
        value
    } else {
        DEFAULT_COMPACT_RATIO
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryManager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns one session's transcript for the duration of a turn.
pub struct MemoryManager {
    session_id: String,
    short_term: Vec<Message>,
    mid_term_summary: Option<String>,
    root: PathBuf,
    models: Arc<ModelManager>,
}

impl MemoryManager {
    /// Create a manager for the given session (a fresh UUID when `None`),
    /// persisting under `root`.
    pub fn new(
        session_id: Option<String>,
        root: impl Into<PathBuf>,
        models: Arc<ModelManager>,
    ) -> Self {
        let session_id = session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            session_id,
            short_term: Vec::new(),
            mid_term_summary: None,
            root: root.into(),
            models,
        }
    }

    /// Rehydrate a session from disk; an unknown id yields an empty state.
    pub fn load_from_disk(
        session_id: &str,
        root: impl Into<PathBuf>,
        models: Arc<ModelManager>,
    ) -> Result<Self> {
        let root = root.into();
        let path = session_path(&root, session_id);
        let mut manager = Self::new(Some(session_id.to_string()), root, models);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let persisted: PersistedSession = serde_json::from_str(&raw)?;
            manager.short_term = persisted.messages;
            manager.mid_term_summary = persisted.mid_term_summary;
        }
        Ok(manager)
    }

    /// The session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The current mid-term summary, if any.
    pub fn mid_term_summary(&self) -> Option<&str> {
        self.mid_term_summary.as_deref()
    }

    /// Number of short-term messages.
    pub fn len(&self) -> usize {
        self.short_term.len()
    }

    /// Whether the transcript is empty.
    pub fn is_empty(&self) -> bool {
        self.short_term.is_empty()
    }

    /// Append one message to the short-term transcript.
    pub fn add(&mut self, message: Message) {
        self.short_term.push(message);
    }

    /// Bulk-extend the transcript, used to replay history.
    pub fn load(&mut self, messages: Vec<Message>) {
        self.short_term.extend(messages);
    }

    /// The context view handed to the model: the mid-term summary (as a
    /// system message) followed by the short-term transcript.
    pub fn context(&self) -> Vec<Message> {
        let mut ctx = Vec::with_capacity(self.short_term.len() + 1);
        if let Some(ref summary) = self.mid_term_summary {
            ctx.push(Message::system(format!("{SUMMARY_LABEL}\n{summary}")));
        }
        ctx.extend(self.short_term.iter().cloned());
        ctx
    }

    /// Write the session to disk atomically.
    pub fn persist(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let doc = PersistedSession {
            session_id: self.session_id.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            mid_term_summary: self.mid_term_summary.clone(),
            messages: self.short_term.clone(),
        };
        let json = serde_json::to_string_pretty(&doc)?;
        let path = session_path(&self.root, &self.session_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Compact the transcript when the estimated context size crosses the
    /// threshold.
    ///
    /// On success the summary replaces the early history and only the last
    /// [`KEEP_RECENT`] messages survive verbatim. A failed or empty summary
    /// leaves the transcript untouched (a placeholder summary is recorded) -
    /// compaction failure never aborts the turn, the next turn re-evaluates.
    pub async fn check_and_compact(&mut self) -> CompactOutcome {
        let context = self.context();
        let tokens = estimate_tokens(&context);
        let profile = self.models.profile("main");
        let threshold = (profile.context_length as f64 * auto_compact_ratio()) as usize;

        if tokens < threshold {
            return CompactOutcome {
                compacted: false,
                tokens,
                threshold,
            };
        }

        tracing::info!(
            session_id = %self.session_id,
            tokens,
            threshold,
            "context over threshold, compacting"
        );

        let summary = self.summarize(context).await;
        match summary {
            Some(text) if !text.trim().is_empty() => {
                self.mid_term_summary = Some(text);
                let keep_from = self.short_term.len().saturating_sub(KEEP_RECENT);
                self.short_term.drain(..keep_from);
                if let Err(e) = self.persist() {
                    tracing::warn!(session_id = %self.session_id, error = %e, "failed to persist after compaction");
                }
                CompactOutcome {
                    compacted: true,
                    tokens,
                    threshold,
                }
            }
            _ => {
                tracing::warn!(
                    session_id = %self.session_id,
                    "compaction produced no summary, transcript retained"
                );
                self.mid_term_summary = Some(COMPACT_FAILED_SUMMARY.to_string());
                CompactOutcome {
                    compacted: false,
                    tokens,
                    threshold,
                }
            }
        }
    }

    async fn summarize(&self, mut context: Vec<Message>) -> Option<String> {
        let client = self.models.client("compact")?;
        context.push(Message::user(COMPACT_PROMPT));
        match client.chat(context, ChatOptions::default()).await {
            Ok(resp) => Some(resp.content),
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "compact model call failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("session_id", &self.session_id)
            .field("short_term", &self.short_term.len())
            .field("has_summary", &self.mid_term_summary.is_some())
            .finish()
    }
}

fn session_path(root: &Path, session_id: &str) -> PathBuf {
    root.join(format!("{session_id}.json"))
}

/// Messages with a `user` or `assistant` role, used when replaying
/// front-end supplied history.
pub fn replayable(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
