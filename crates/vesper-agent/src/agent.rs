//! The top-level agent loop.
//!
//! One [`Agent`] instance serves the whole process; each request spawns an
//! isolated run that owns a fresh [`MemoryManager`] and writes typed events
//! into a bounded channel until it emits `done`. The loop follows
//! plan-dispatch-observe: call the model, dispatch any requested tools,
//! feed results back into memory, repeat until the model answers without
//! tool calls or the iteration budget runs out.

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use crate::event::{AgentEvent, EventSender, event_channel};
use crate::manager::{DispatchedCall, ToolManager};
use crate::prompt;
use crate::subagent::CompactReport;
use crate::tool::ToolOutput;
use crate::truncate::{char_prefix, truncate_tool_result};
use vesper_llm::{ChatOptions, ModelManager};
use vesper_memory::{MemoryManager, replayable};
use vesper_store::{FileStore, LtmStore, TodoStore};
use vesper_types::{ContentPart, Message, TodoItem};

/// Default iteration budget per run.
const DEFAULT_MAX_ITERATIONS: u32 = 999;

/// Assistant content longer than this is cached instead of stored verbatim.
const CONTENT_CACHE_THRESHOLD: usize = 5000;

/// How much of a cached assistant response stays in the transcript.
const CONTENT_PREVIEW_CHARS: usize = 500;

/// Text attachments are clipped to this many characters.
const ATTACHMENT_MAX_CHARS: usize = 20_000;

/// At most this many outstanding TODOs are listed in the reminder.
const TODO_REMINDER_LIMIT: usize = 10;

/// Key findings kept in the compact sub-agent memory record.
const SUBAGENT_MEMORY_FINDINGS: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// One chat request entering the loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRequest {
    /// The user's message.
    pub user_input: String,
    /// Attachment file ids.
    #[serde(default)]
    pub file_ids: Vec<String>,
    /// Prior conversation supplied by the front-end; only `user` and
    /// `assistant` entries are replayed.
    #[serde(default)]
    pub history: Vec<Message>,
    /// Session id; a fresh UUID is used when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Iteration budget.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Whether to distil long-term preferences at the end of the run.
    #[serde(default)]
    pub save_ltm: bool,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl AgentRequest {
    /// A plain text request.
    pub fn text(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            ..Default::default()
        }
    }

    /// Pin the session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

/// Process-wide agent: model access, tool registry and stores.
pub struct Agent {
    models: Arc<ModelManager>,
    tools: Arc<ToolManager>,
    todos: Arc<TodoStore>,
    files: Arc<FileStore>,
    ltm: Arc<LtmStore>,
    conversations_root: PathBuf,
}

impl Agent {
    /// Assemble an agent from its collaborators.
    pub fn new(
        models: Arc<ModelManager>,
        tools: Arc<ToolManager>,
        todos: Arc<TodoStore>,
        files: Arc<FileStore>,
        ltm: Arc<LtmStore>,
        conversations_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            models,
            tools,
            todos,
            files,
            ltm,
            conversations_root: conversations_root.into(),
        }
    }

    /// Start a run; events arrive on the returned channel and the channel
    /// closes after `done`.
    pub fn run(self: &Arc<Self>, request: AgentRequest) -> mpsc::Receiver<AgentEvent> {
        let (events, rx) = event_channel();
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            agent.run_inner(request, events).await;
        });
        rx
    }

    async fn run_inner(&self, request: AgentRequest, events: EventSender) {
        let session_id = request
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::info!(%session_id, "agent run starting");

        if request.max_iterations == 0 {
            // A zero budget means no model call at all, only a terminal event.
            let _ = events.emit(AgentEvent::Done).await;
            return;
        }

        let mut memory = MemoryManager::new(
            Some(session_id.clone()),
            &self.conversations_root,
            Arc::clone(&self.models),
        );

        self.setup_context(&request, &mut memory);

        // Compaction check before the first model call.
        let compact = memory.check_and_compact().await;
        if !events
            .emit(AgentEvent::meta(json!({ "compact": compact })))
            .await
        {
            return;
        }

        if !self.replay_outstanding_todos(&session_id, &mut memory, &events).await {
            return;
        }

        let finished = self.iterate(&request, &mut memory, &events).await;

        if !finished {
            // Iteration budget exhausted.
            let warning = format!(
                "\n\nTask incomplete: reached the maximum of {} iterations; \
                 retry with a higher max_iterations",
                request.max_iterations
            );
            let _ = events.emit(AgentEvent::content(warning)).await;
            self.persist(&memory);
            if request.save_ltm {
                self.save_long_term_memory(&memory, &events).await;
            }
        }

        let _ = events.emit(AgentEvent::Done).await;
        tracing::info!(%session_id, "agent run finished");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Setup
    // ─────────────────────────────────────────────────────────────────────

    fn setup_context(&self, request: &AgentRequest, memory: &mut MemoryManager) {
        memory.add(Message::system(prompt::main_system_prompt(
            &self.tools.describe_all(),
        )));

        if LtmStore::enabled() {
            let ltm_content = self.ltm.read_all();
            if !ltm_content.trim().is_empty() {
                memory.add(Message::system(format!(
                    "## Long-term user preferences (distilled from history)\n\n{ltm_content}"
                )));
            }
        }

        if !request.history.is_empty() {
            memory.load(replayable(request.history.clone()));
        }

        // Attachments: images become user-message parts, text files become
        // system messages.
        let mut image_parts = Vec::new();
        for fid in &request.file_ids {
            let Some(path) = self.files.get_path(fid) else {
                tracing::warn!(%fid, "attachment not found");
                continue;
            };
            if FileStore::is_image_file(&path) {
                if let Some(image) = self.files.get_image_data_url(fid) {
                    image_parts.push(ContentPart::image(image.url));
                }
            } else if let Some(text) = self.files.get_text(fid) {
                let snippet = char_prefix(&text, ATTACHMENT_MAX_CHARS);
                memory.add(Message::system(format!("[attachment:{fid}]\n{snippet}")));
            }
        }

        if image_parts.is_empty() {
            memory.add(Message::user(request.user_input.clone()));
        } else {
            let mut parts = vec![ContentPart::text(request.user_input.clone())];
            parts.extend(image_parts);
            memory.add(Message::user_parts(parts));
        }
    }

    async fn replay_outstanding_todos(
        &self,
        session_id: &str,
        memory: &mut MemoryManager,
        events: &EventSender,
    ) -> bool {
        let existing = match self.todos.list(session_id) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load TODOs for replay");
                return true;
            }
        };
        let pending: Vec<&TodoItem> = existing.iter().filter(|t| t.status.is_open()).collect();
        if pending.is_empty() {
            return true;
        }

        tracing::info!(count = pending.len(), "resuming outstanding TODOs");
        let listing = pending
            .iter()
            .take(TODO_REMINDER_LIMIT)
            .map(|t| {
                format!(
                    "- [{}] {}: {}",
                    t.status.as_str(),
                    t.title,
                    t.description.as_deref().unwrap_or("(no description)")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        memory.add(Message::system(format!(
            "<system-reminder>\nOutstanding TODO items from this session:\n\n{listing}\n\n\
             Continue working through them. Use update_todo to mark progress; \
             do not create a duplicate plan.\n</system-reminder>"
        )));

        events
            .emit(AgentEvent::meta(json!({
                "todos_loaded": true,
                "pending_count": pending.len(),
                "total_count": existing.len(),
            })))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Iteration
    // ─────────────────────────────────────────────────────────────────────

    /// Drive the turn loop. Returns true when the run terminated naturally
    /// (final answer or fatal model error), false when the budget ran out.
    async fn iterate(
        &self,
        request: &AgentRequest,
        memory: &mut MemoryManager,
        events: &EventSender,
    ) -> bool {
        let Some(client) = self.models.client("main") else {
            let _ = events
                .emit(AgentEvent::content("\n\n[error] no main model configured\n"))
                .await;
            self.persist(memory);
            return true;
        };
        let definitions = self.tools.definitions();

        let mut iteration = 0;
        while iteration < request.max_iterations {
            iteration += 1;
            tracing::info!(iteration, max = request.max_iterations, "loop iteration");

            let options = ChatOptions::with_tools(definitions.clone());
            let response = match client.chat(memory.context(), options).await {
                Ok(resp) => resp,
                Err(e) => {
                    // Retries are exhausted inside the client; surface the
                    // failure to the stream and end the run.
                    tracing::error!(iteration, error = %e, "model call failed");
                    let _ = events
                        .emit(AgentEvent::content(format!(
                            "\n\n[error] iteration {iteration} failed: {e}\n"
                        )))
                        .await;
                    self.persist(memory);
                    return true;
                }
            };

            // Transcript-side content: long responses are cached and only a
            // preview is kept in memory.
            let stored_content = if response.content.chars().count() > CONTENT_CACHE_THRESHOLD {
                match self.files.cache_base64(
                    &BASE64.encode(response.content.as_bytes()),
                    "text",
                    json!({"length": response.content.chars().count()}),
                ) {
                    Ok(fid) => {
                        tracing::info!(%fid, "long response cached");
                        format!(
                            "{}\n...[full content cached: {fid}; use save_cached_file to keep it]",
                            char_prefix(&response.content, CONTENT_PREVIEW_CHARS)
                        )
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to cache long response");
                        response.content.clone()
                    }
                }
            } else {
                response.content.clone()
            };

            if !response.content.is_empty()
                && !events.emit_content_chunks(&response.content).await
            {
                return true;
            }

            if response.tool_calls.is_empty() {
                if !response.content.is_empty() {
                    memory.add(Message::assistant(stored_content));
                }
                self.persist(memory);
                if request.save_ltm {
                    self.save_long_term_memory(memory, events).await;
                }
                return true;
            }

            // The assistant message carrying the calls is recorded before
            // any tool message.
            if !events.emit(AgentEvent::tool_call(response.tool_calls.len())).await {
                return true;
            }
            memory.add(Message::assistant_with_calls(
                stored_content,
                response.tool_calls.clone(),
            ));

            let results = self
                .tools
                .execute_tool_calls(&response.tool_calls, memory.session_id())
                .await;

            let mut next_round_images = Vec::new();
            for result in &results {
                if result.tool_name.ends_with("_subagent") {
                    if !self
                        .handle_subagent_result(result, memory, events, &mut next_round_images)
                        .await
                    {
                        return true;
                    }
                } else if !self
                    .handle_tool_result(result, memory, events, &mut next_round_images)
                    .await
                {
                    return true;
                }
            }

            if !next_round_images.is_empty() {
                let mut parts = vec![ContentPart::text(prompt::IMAGE_INJECTION_NOTE)];
                let count = next_round_images.len();
                parts.append(&mut next_round_images);
                memory.add(Message::user_parts(parts));
                tracing::info!(count, "queued images injected for next round");
            }
        }

        false
    }

    /// Ordinary tool result: truncate, remember, emit, queue images.
    async fn handle_tool_result(
        &self,
        result: &DispatchedCall,
        memory: &mut MemoryManager,
        events: &EventSender,
        next_round_images: &mut Vec<ContentPart>,
    ) -> bool {
        let raw = result.output.to_json_string();
        let truncated = truncate_tool_result(&raw, &self.files);

        // An image file id in the result is queued so the model can see the
        // image next round.
        if !result.output.error
            && let Some(fid) = result
                .output
                .data
                .as_ref()
                .and_then(|d| d.get("file_id"))
                .and_then(|v| v.as_str())
            && let Some(path) = self.files.get_path(fid)
            && FileStore::is_image_file(&path)
            && let Some(image) = self.files.get_image_data_url(fid)
        {
            next_round_images.push(ContentPart::image(image.url));
        }

        memory.add(Message::tool(
            &result.tool_call_id,
            &result.tool_name,
            truncated.clone(),
        ));
        events
            .emit(AgentEvent::tool_result(&result.tool_name, truncated))
            .await
    }

    /// Sub-agent result: a trimmed record goes to memory, a readable report
    /// goes to the stream, image artifacts are queued for the next round.
    async fn handle_subagent_result(
        &self,
        result: &DispatchedCall,
        memory: &mut MemoryManager,
        events: &EventSender,
        next_round_images: &mut Vec<ContentPart>,
    ) -> bool {
        let report = (!result.output.error)
            .then(|| result.output.data.clone())
            .flatten()
            .and_then(|data| serde_json::from_value::<CompactReport>(data).ok());

        let Some(report) = report else {
            // Failed sub-agent: record the raw output, tell the user.
            let message = result
                .output
                .message
                .clone()
                .unwrap_or_else(|| "sub-agent run failed".to_string());
            memory.add(result.to_message());
            return events
                .emit(AgentEvent::tool_result(
                    &result.tool_name,
                    format!("sub-agent failed: {message}"),
                ))
                .await;
        };

        for fid in &report.artifacts {
            if let Some(path) = self.files.get_path(fid)
                && FileStore::is_image_file(&path)
                && let Some(image) = self.files.get_image_data_url(fid)
            {
                next_round_images.push(ContentPart::image(image.url));
            }
        }

        let memory_record = ToolOutput::ok(json!({
            "subagent": &report.subagent,
            "summary": &report.summary,
            "key_findings": report
                .key_findings
                .iter()
                .take(SUBAGENT_MEMORY_FINDINGS)
                .collect::<Vec<_>>(),
            "artifacts_count": report.artifacts.len(),
            "todos_status": format!("{}/{}", report.todos_completed, report.todos_total),
            "iterations": report.iterations,
            "report_id": &report.report_id,
        }));
        memory.add(Message::tool(
            &result.tool_call_id,
            &result.tool_name,
            memory_record.to_json_string(),
        ));

        events
            .emit(AgentEvent::tool_result(
                &result.tool_name,
                render_subagent_report(&report),
            ))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Termination helpers
    // ─────────────────────────────────────────────────────────────────────

    fn persist(&self, memory: &MemoryManager) {
        // Durability is best-effort; a failed write never ends the run.
        if let Err(e) = memory.persist() {
            tracing::warn!(session_id = %memory.session_id(), error = %e, "failed to persist session");
        } else {
            tracing::info!(session_id = %memory.session_id(), "session persisted");
        }
    }

    async fn save_long_term_memory(&self, memory: &MemoryManager, events: &EventSender) {
        let Some(client) = self.models.client("main") else {
            return;
        };

        let mut context = memory.context();
        let existing = self.ltm.read_all();
        let request = if existing.trim().is_empty() {
            prompt::PREFERENCE_PROMPT.to_string()
        } else {
            format!(
                "## Existing long-term memory\n\n{existing}\n\n---\n\n{}\n\
                 重要：在已有记忆的基础上增量更新，避免重复已记录的内容。",
                prompt::PREFERENCE_PROMPT
            )
        };
        context.push(Message::user(request));

        match client.chat(context, ChatOptions::default()).await {
            Ok(resp) if !resp.content.trim().is_empty() => {
                if let Err(e) = self.ltm.append_section(
                    prompt::PREFERENCE_HEADING,
                    &resp.content,
                    &["preference"],
                ) {
                    tracing::warn!(error = %e, "failed to write long-term memory");
                    return;
                }
                let _ = events
                    .emit(AgentEvent::meta(json!({
                        "ltm_saved": true,
                        "path": self.ltm.path().display().to_string(),
                        "kind": "preferences",
                    })))
                    .await;
            }
            Ok(_) => {
                let _ = events
                    .emit(AgentEvent::meta(json!({
                        "ltm_saved": false,
                        "reason": "empty_summary",
                    })))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "preference distillation failed");
            }
        }
    }
}

/// Human-readable report block pushed to the stream for sub-agent results.
fn render_subagent_report(report: &CompactReport) -> String {
    let findings = if report.key_findings.is_empty() {
        "(none)".to_string()
    } else {
        report
            .key_findings
            .iter()
            .take(10)
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let artifacts = if report.artifacts.is_empty() {
        "none".to_string()
    } else {
        let shown = report
            .artifacts
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let suffix = if report.artifacts.len() > 5 { ", ..." } else { "" };
        format!("{} file(s) ({shown}{suffix})", report.artifacts.len())
    };

    let report_line = report
        .report_id
        .as_deref()
        .map(|id| format!("\n**Full report**: {id} (use read_report to open it)"))
        .unwrap_or_default();

    format!(
        "**{} report**\n\n\
         **Summary**: {}\n\n\
         **Key findings**:\n{findings}\n\n\
         **Artifacts**: {artifacts}\n\n\
         **Execution**: {}/{} tasks completed over {} iterations{report_line}",
        report.subagent,
        report.summary,
        report.todos_completed,
        report.todos_total,
        report.iterations,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let req: AgentRequest = serde_json::from_str(r#"{"user_input":"hi"}"#).unwrap();
        assert_eq!(req.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(!req.save_ltm);
        assert!(req.file_ids.is_empty());
        assert!(req.session_id.is_none());
    }

    #[test]
    fn subagent_report_rendering() {
        let report = CompactReport {
            error: false,
            summary: "All done".into(),
            key_findings: vec!["finding one".into()],
            artifacts: vec!["fid-1".into(), "fid-2".into()],
            todos_completed: 2,
            todos_total: 3,
            iterations: 4,
            subagent: "SearchSubAgent".into(),
            report_id: Some("20250101_000000_abcd1234".into()),
        };
        let rendered = render_subagent_report(&report);
        assert!(rendered.contains("SearchSubAgent"));
        assert!(rendered.contains("All done"));
        assert!(rendered.contains("- finding one"));
        assert!(rendered.contains("2 file(s)"));
        assert!(rendered.contains("2/3 tasks"));
        assert!(rendered.contains("read_report"));
    }
}
