//! Generic sub-agent runtime.
//!
//! A sub-agent is structurally the main loop with reduced scope: an isolated
//! [`MemoryManager`], a narrower tool registry, its own TODO planning, and a
//! compact structured report as its only output. Concrete kinds differ only
//! in their [`SubAgentConfig`] and [`ReportPolicy`] - composition, not
//! inheritance.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::manager::ToolManager;
use crate::prompt;
use crate::tool::{ToolErrorKind, ToolOutput};
use crate::truncate::char_prefix;
use vesper_llm::{ChatOptions, ModelManager, ToolChoice, ToolDefinition};
use vesper_memory::MemoryManager;
use vesper_store::{FileStore, ReportFields, ReportStore, TodoProgress, TodoStore};
use vesper_types::{Message, Role, TodoAgentType, TodoCreate, TodoPatch, TodoStatus};

/// Iterations during which tool use is forced (`tool_choice=required`).
const FORCED_TOOL_ITERATIONS: u32 = 2;

/// Env knob bounding heavy calls admitted per iteration.
const MAX_HEAVY_ENV: &str = "SUBAGENT_MAX_HEAVY_CALLS_PER_ITER";

/// Default heavy-call budget per iteration.
const DEFAULT_MAX_HEAVY: usize = 1;

/// Env knob for an optional pause between iterations, seconds.
const ITERATION_DELAY_ENV: &str = "SUBAGENT_ITERATION_DELAY";

/// Content longer than this is summarised through the quick model.
const SUMMARY_SOURCE_LIMIT: usize = 500;

/// Target length of the compact summary, characters.
const SUMMARY_MAX_CHARS: usize = 200;

/// At most this many key findings survive into the report.
const MAX_KEY_FINDINGS: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Everything that distinguishes one sub-agent kind from another.
#[derive(Debug, Clone)]
pub struct SubAgentConfig {
    /// Display name, e.g. `SearchSubAgent`.
    pub name: String,
    /// Agent kind used to tag TODO items.
    pub kind: TodoAgentType,
    /// One-line description.
    pub description: String,
    /// System prompt template with a `{tool_descriptions}` slot.
    pub prompt_template: String,
    /// Iteration budget.
    pub max_iterations: u32,
    /// Model pointer resolved through the [`ModelManager`].
    pub model_pointer: String,
}

impl SubAgentConfig {
    /// The deep-search sub-agent.
    pub fn search() -> Self {
        Self {
            name: "SearchSubAgent".to_string(),
            kind: TodoAgentType::Search,
            description: "Deep web research: papers, documentation, multi-source analysis"
                .to_string(),
            prompt_template: prompt::search_template().to_string(),
            max_iterations: 999,
            model_pointer: "search_agent".to_string(),
        }
    }

    /// The browser-automation sub-agent.
    pub fn browser() -> Self {
        Self {
            name: "BrowserSubAgent".to_string(),
            kind: TodoAgentType::Browser,
            description: "Multi-step browser automation: navigate, fill, submit, capture"
                .to_string(),
            prompt_template: prompt::browser_template().to_string(),
            max_iterations: 15,
            model_pointer: "browser_agent".to_string(),
        }
    }

    /// The desktop-control sub-agent.
    pub fn windows() -> Self {
        Self {
            name: "WindowsSubAgent".to_string(),
            kind: TodoAgentType::Windows,
            description: "Desktop automation: launch apps, drive UI, run commands".to_string(),
            prompt_template: prompt::windows_template().to_string(),
            max_iterations: 15,
            model_pointer: "windows_agent".to_string(),
        }
    }
}

/// Shared services a sub-agent runtime needs.
#[derive(Clone)]
pub struct SubAgentDeps {
    /// Model pointer resolution.
    pub models: Arc<ModelManager>,
    /// Per-session planner store.
    pub todos: Arc<TodoStore>,
    /// Blob cache.
    pub files: Arc<FileStore>,
    /// Durable report store.
    pub reports: Arc<ReportStore>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Compact report
// ─────────────────────────────────────────────────────────────────────────────

/// The single structured record a sub-agent returns to its parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactReport {
    /// Always false; failures are returned as error outputs instead.
    pub error: bool,
    /// Execution summary, at most ~200 characters.
    pub summary: String,
    /// De-duplicated findings harvested from tool-result `_summary` fields.
    pub key_findings: Vec<String>,
    /// De-duplicated artifact file ids harvested from tool results.
    pub artifacts: Vec<String>,
    /// Completed planner items.
    pub todos_completed: usize,
    /// Total planner items.
    pub todos_total: usize,
    /// Iterations used.
    pub iterations: u32,
    /// The sub-agent's display name.
    pub subagent: String,
    /// Durable report id, present when the policy persisted a full report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
}

/// One working planner item inside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingTodo {
    /// Title without the store prefix.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Current status.
    pub status: TodoStatus,
    /// Backing store id, used to mirror updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
}

/// Snapshot handed to the report policy at termination.
pub struct RunSnapshot<'a> {
    /// The task the sub-agent was given.
    pub task_description: &'a str,
    /// The full transcript of the run.
    pub transcript: &'a [Message],
    /// Final working planner list.
    pub todos: &'a [WorkingTodo],
    /// Iterations used.
    pub iterations: u32,
}

/// Strategy applied to the compact report on termination.
#[async_trait]
pub trait ReportPolicy: Send + Sync {
    /// Post-process the report, e.g. persist a full document.
    async fn finalize(&self, report: CompactReport, snapshot: &RunSnapshot<'_>) -> CompactReport;
}

/// Returns the inline record unchanged.
pub struct InlineReportPolicy;

#[async_trait]
impl ReportPolicy for InlineReportPolicy {
    async fn finalize(&self, report: CompactReport, _snapshot: &RunSnapshot<'_>) -> CompactReport {
        report
    }
}

/// Persists the full transcript-derived report and attaches its id.
pub struct PersistedReportPolicy {
    reports: Arc<ReportStore>,
    kind: String,
}

impl PersistedReportPolicy {
    /// Create a policy writing under the given report kind.
    pub fn new(reports: Arc<ReportStore>, kind: impl Into<String>) -> Self {
        Self {
            reports,
            kind: kind.into(),
        }
    }
}

#[async_trait]
impl ReportPolicy for PersistedReportPolicy {
    async fn finalize(
        &self,
        mut report: CompactReport,
        snapshot: &RunSnapshot<'_>,
    ) -> CompactReport {
        let fields = ReportFields {
            task_description: snapshot.task_description.to_string(),
            summary: report.summary.clone(),
            todos: snapshot
                .todos
                .iter()
                .map(|t| TodoProgress {
                    title: t.title.clone(),
                    status: t.status,
                })
                .collect(),
            search_results: harvest_search_results(snapshot.transcript),
            key_findings: report.key_findings.clone(),
            artifacts: report.artifacts.clone(),
            iterations: snapshot.iterations,
            metadata: json!({ "subagent": report.subagent.clone() }),
        };

        match self.reports.save(&self.kind, &fields) {
            Ok(report_id) => report.report_id = Some(report_id),
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist sub-agent report");
            }
        }
        report
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// An isolated sub-agent loop instance.
pub struct SubAgentRuntime {
    config: SubAgentConfig,
    tools: ToolManager,
    deps: SubAgentDeps,
    policy: Arc<dyn ReportPolicy>,
    session_id: String,
    memory: MemoryManager,
    todos: Vec<WorkingTodo>,
}

impl SubAgentRuntime {
    /// Create a runtime bound to the parent's session.
    pub fn new(
        config: SubAgentConfig,
        tools: ToolManager,
        deps: SubAgentDeps,
        policy: Arc<dyn ReportPolicy>,
        session_id: impl Into<String>,
    ) -> Self {
        // Sub-agent memory is ephemeral: it is never compacted or persisted.
        let memory = MemoryManager::new(None, std::env::temp_dir(), Arc::clone(&deps.models));
        Self {
            config,
            tools,
            deps,
            policy,
            session_id: session_id.into(),
            memory,
            todos: Vec::new(),
        }
    }

    fn store_title(&self, title: &str) -> String {
        format!("[{}] {title}", self.config.name)
    }

    fn strip_store_prefix(&self, title: &str) -> String {
        title
            .strip_prefix(&format!("[{}] ", self.config.name))
            .unwrap_or(title)
            .to_string()
    }

    fn builtin_definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "create_subagent_todo",
                "Plan the task as a list of steps. When active tasks of this kind already \
                 exist in the session, they are reused and no new ones are created.",
                json!({
                    "type": "object",
                    "properties": {
                        "todos": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "title": {"type": "string", "description": "Step title"},
                                    "description": {"type": "string", "description": "Step detail"}
                                },
                                "required": ["title"]
                            }
                        }
                    },
                    "required": ["todos"]
                }),
            ),
            ToolDefinition::new(
                "update_subagent_todo",
                "Update the status of one planned step by index.",
                json!({
                    "type": "object",
                    "properties": {
                        "index": {"type": "integer", "description": "Zero-based step index"},
                        "status": {
                            "type": "string",
                            "enum": ["pending", "in_progress", "completed"],
                            "description": "New status"
                        }
                    },
                    "required": ["index", "status"]
                }),
            ),
        ]
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.tools.definitions();
        defs.extend(Self::builtin_definitions());
        defs
    }

    fn system_prompt(&self) -> String {
        let descriptions = if self.tools.is_empty() {
            "(no specialised tools registered)".to_string()
        } else {
            self.tools.describe_all()
        };
        prompt::render_template(&self.config.prompt_template, &descriptions)
    }

    /// Load this kind's open items from the store into the working list.
    fn load_existing_todos(&mut self) {
        let existing = match self.deps.todos.list(&self.session_id) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load existing TODOs");
                return;
            }
        };

        let open: Vec<WorkingTodo> = existing
            .into_iter()
            .filter(|t| t.agent_type == self.config.kind && t.status.is_open())
            .map(|t| WorkingTodo {
                title: self.strip_store_prefix(&t.title),
                description: t.description.unwrap_or_default(),
                status: t.status,
                store_id: Some(t.id),
            })
            .collect();

        if !open.is_empty() {
            tracing::info!(
                subagent = %self.config.name,
                count = open.len(),
                "resuming existing open TODOs"
            );
            self.todos = open;
        }
    }

    fn handle_create_todo(&mut self, args: &Value) -> ToolOutput {
        // Reuse policy: with any open item of this kind in the session, no
        // new items are created; the existing list becomes the working list.
        if let Ok(existing) = self.deps.todos.list(&self.session_id) {
            let active: Vec<WorkingTodo> = existing
                .into_iter()
                .filter(|t| t.agent_type == self.config.kind && t.status.is_open())
                .map(|t| WorkingTodo {
                    title: self.strip_store_prefix(&t.title),
                    description: t.description.unwrap_or_default(),
                    status: t.status,
                    store_id: Some(t.id),
                })
                .collect();

            if !active.is_empty() {
                self.todos = active;
                let count = self.todos.len();
                return ToolOutput::ok_with_message(
                    format!(
                        "found {count} active tasks of this kind, skipped creating new ones; \
                         continue with the existing list"
                    ),
                    json!({
                        "skipped": true,
                        "active_todos_count": count,
                        "existing_todos": &self.todos,
                    }),
                );
            }
        }

        let Some(items) = args.get("todos").and_then(|v| v.as_array()) else {
            return ToolOutput::failure(
                ToolErrorKind::ToolFailure,
                "missing required 'todos' array",
            );
        };

        let mut created = Vec::new();
        for item in items {
            let title = item
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            if title.is_empty() {
                continue;
            }
            let description = item
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string();

            let store_id = match self.deps.todos.create(
                &self.session_id,
                TodoCreate {
                    title: self.store_title(&title),
                    description: Some(description.clone()),
                    status: Some(TodoStatus::Pending),
                    priority: None,
                    agent_type: Some(self.config.kind),
                },
            ) {
                Ok(item) => Some(item.id),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to mirror TODO to store");
                    None
                }
            };

            created.push(WorkingTodo {
                title,
                description,
                status: TodoStatus::Pending,
                store_id,
            });
        }

        self.todos = created;
        ToolOutput::ok(json!({
            "todos": &self.todos,
            "message": format!("created {} tasks and mirrored them to the store", self.todos.len()),
        }))
    }

    fn handle_update_todo(&mut self, args: &Value) -> ToolOutput {
        let index = args.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let Some(status) = args
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(parse_status)
        else {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, "invalid or missing status");
        };

        let session_id = self.session_id.clone();
        let Some(todo) = self.todos.get_mut(index) else {
            return ToolOutput::failure(
                ToolErrorKind::ToolFailure,
                format!("task index {index} out of range"),
            );
        };

        todo.status = status;
        if let Some(ref store_id) = todo.store_id
            && let Err(e) =
                self.deps
                    .todos
                    .update(&session_id, store_id, TodoPatch::status(status))
        {
            tracing::warn!(error = %e, "failed to mirror TODO update");
        }

        ToolOutput::ok(json!({
            "todo": &self.todos[index],
            "message": format!("task #{index} set to {}", status.as_str()),
        }))
    }

    async fn dispatch(&mut self, name: &str, args: &Value) -> ToolOutput {
        match name {
            "create_subagent_todo" => self.handle_create_todo(args),
            "update_subagent_todo" => self.handle_update_todo(args),
            _ => {
                self.tools
                    .execute_tool(name, args.clone(), &self.session_id)
                    .await
            }
        }
    }

    /// Run the sub-agent to completion and return its compact report as a
    /// tool output. All failures are normalised into error outputs.
    pub async fn run(mut self, task_description: &str, context: Option<Value>) -> ToolOutput {
        tracing::info!(subagent = %self.config.name, session_id = %self.session_id, "sub-agent starting");

        let Some(client) = self.deps.models.client(&self.config.model_pointer) else {
            return ToolOutput::failure(
                ToolErrorKind::ToolFailure,
                format!("no model client for pointer {}", self.config.model_pointer),
            );
        };

        self.load_existing_todos();

        let system_prompt = self.system_prompt();
        self.memory.add(Message::system(system_prompt));
        if let Some(ref ctx) = context {
            let rendered = serde_json::to_string_pretty(ctx).unwrap_or_default();
            self.memory
                .add(Message::system(format!("**Context**:\n```json\n{rendered}\n```")));
        }
        self.memory.add(Message::user(task_description));

        let definitions = self.definitions();
        let mut iteration = 0;

        while iteration < self.config.max_iterations {
            iteration += 1;
            tracing::info!(
                subagent = %self.config.name,
                iteration,
                max = self.config.max_iterations,
                "sub-agent iteration"
            );

            let tool_choice = if iteration <= FORCED_TOOL_ITERATIONS {
                ToolChoice::Required
            } else {
                ToolChoice::Auto
            };

            let options =
                ChatOptions::with_tools(definitions.clone()).tool_choice(tool_choice);
            let response = match client.chat(self.memory.context(), options).await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::error!(subagent = %self.config.name, error = %e, "sub-agent model call failed");
                    return ToolOutput::failure(
                        ToolErrorKind::ToolFailure,
                        format!("sub-agent model call failed: {e}"),
                    );
                }
            };

            if response.tool_calls.is_empty() {
                if tool_choice == ToolChoice::Required {
                    // The plan-first contract is not negotiable in the first
                    // iterations; remind and re-enter.
                    self.memory
                        .add(Message::system(prompt::FORCED_TOOL_REMINDER));
                    continue;
                }

                if !response.content.is_empty() {
                    self.memory.add(Message::assistant(response.content.clone()));
                }
                self.complete_in_progress();
                return self
                    .finish(task_description, iteration, response.content)
                    .await;
            }

            // Heavy-call throttling: admit all light calls plus a bounded
            // number of heavy ones. Dropped calls still get a synthetic tool
            // message so every recorded call id stays paired.
            let (light, heavy): (Vec<_>, Vec<_>) = response
                .tool_calls
                .iter()
                .cloned()
                .partition(|c| !is_heavy_call(c.name()));
            let budget = heavy_budget();
            let admitted_heavy = heavy.iter().take(budget).cloned().collect::<Vec<_>>();
            let dropped_heavy = heavy.iter().skip(budget).cloned().collect::<Vec<_>>();

            self.memory.add(Message::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in light.iter().chain(admitted_heavy.iter()) {
                let args: Value = match serde_json::from_str(call.arguments()) {
                    Ok(v) => v,
                    Err(e) => {
                        let output = ToolOutput::failure(
                            ToolErrorKind::ArgumentParseError,
                            format!("invalid JSON arguments: {e}"),
                        );
                        self.memory
                            .add(Message::tool(&call.id, call.name(), output.to_json_string()));
                        continue;
                    }
                };

                let output = self.dispatch(call.name(), &args).await;
                self.memory
                    .add(Message::tool(&call.id, call.name(), output.to_json_string()));
            }

            for call in &dropped_heavy {
                let output = ToolOutput::failure(
                    ToolErrorKind::Throttled,
                    "deferred: the heavy-call budget for this iteration is exhausted; \
                     issue the call again next iteration",
                );
                self.memory
                    .add(Message::tool(&call.id, call.name(), output.to_json_string()));
            }

            if iteration < self.config.max_iterations {
                iteration_delay().await;
            }
        }

        tracing::warn!(
            subagent = %self.config.name,
            max_iterations = self.config.max_iterations,
            "sub-agent hit the iteration cap"
        );
        let max = self.config.max_iterations;
        self.finish(task_description, max, String::new()).await
    }

    /// Natural-exit cleanup: whatever was still in progress is completed,
    /// in memory and in the store. Pending items are left alone.
    fn complete_in_progress(&mut self) {
        let session_id = self.session_id.clone();
        for todo in &mut self.todos {
            if todo.status == TodoStatus::InProgress {
                todo.status = TodoStatus::Completed;
                if let Some(ref store_id) = todo.store_id
                    && let Err(e) = self.deps.todos.update(
                        &session_id,
                        store_id,
                        TodoPatch::status(TodoStatus::Completed),
                    )
                {
                    tracing::warn!(error = %e, "failed to auto-complete TODO in store");
                }
            }
        }
    }

    async fn finish(self, task_description: &str, iterations: u32, final_content: String) -> ToolOutput {
        let transcript = self.memory.context();
        let (key_findings, artifacts) = harvest_tool_results(&transcript);
        let summary = self.summarize(&final_content).await;
        let todos_completed = self
            .todos
            .iter()
            .filter(|t| t.status == TodoStatus::Completed)
            .count();

        let report = CompactReport {
            error: false,
            summary,
            key_findings,
            artifacts,
            todos_completed,
            todos_total: self.todos.len(),
            iterations,
            subagent: self.config.name.clone(),
            report_id: None,
        };

        let snapshot = RunSnapshot {
            task_description,
            transcript: &transcript,
            todos: &self.todos,
            iterations,
        };
        let report = self.policy.finalize(report, &snapshot).await;

        match serde_json::to_value(&report) {
            Ok(data) => ToolOutput::ok(data),
            Err(e) => ToolOutput::failure(
                ToolErrorKind::ToolFailure,
                format!("failed to serialise report: {e}"),
            ),
        }
    }

    async fn summarize(&self, final_content: &str) -> String {
        if final_content.is_empty() {
            return format!("{} run completed", self.config.name);
        }
        if final_content.chars().count() <= SUMMARY_SOURCE_LIMIT {
            return final_content.to_string();
        }

        let source = char_prefix(final_content, 2000);
        let request = format!(
            "Summarize the following sub-agent result in at most {SUMMARY_MAX_CHARS} characters:\n\n{source}"
        );
        match self.deps.models.client("quick") {
            Some(client) => match client
                .chat(vec![Message::user(request)], ChatOptions::default())
                .await
            {
                Ok(resp) if !resp.content.trim().is_empty() => resp.content,
                _ => format!("{}...", char_prefix(final_content, SUMMARY_MAX_CHARS)),
            },
            None => format!("{}...", char_prefix(final_content, SUMMARY_MAX_CHARS)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harvesting
// ─────────────────────────────────────────────────────────────────────────────

fn parse_status(s: &str) -> Option<TodoStatus> {
    match s {
        "pending" => Some(TodoStatus::Pending),
        "in_progress" => Some(TodoStatus::InProgress),
        "completed" => Some(TodoStatus::Completed),
        _ => None,
    }
}

/// Heavy calls are upstream-API hungry: search-tool calls and nested
/// sub-agents.
pub fn is_heavy_call(name: &str) -> bool {
    name.starts_with("tavily_") || name.ends_with("_subagent")
}

fn heavy_budget() -> usize {
    std::env::var(MAX_HEAVY_ENV)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .map(|v| if v <= 0 { 1 } else { v as usize })
        .unwrap_or(DEFAULT_MAX_HEAVY)
}

async fn iteration_delay() {
    let secs = std::env::var(ITERATION_DELAY_ENV)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);
    if secs > 0.0 {
        tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
    }
}

/// Walk tool messages and collect `_summary` findings and artifact file ids,
/// de-duplicated in first-seen order.
fn harvest_tool_results(transcript: &[Message]) -> (Vec<String>, Vec<String>) {
    let mut findings = Vec::new();
    let mut artifacts = Vec::new();

    for message in transcript.iter().filter(|m| m.role == Role::Tool) {
        let Ok(output) = serde_json::from_str::<ToolOutput>(&message.text()) else {
            continue;
        };
        if output.error {
            continue;
        }
        let Some(data) = output.data.as_ref().and_then(|d| d.as_object()) else {
            continue;
        };

        for key in ["file_id", "screenshot_file_id"] {
            if let Some(fid) = data.get(key).and_then(|v| v.as_str())
                && !artifacts.iter().any(|a| a == fid)
            {
                artifacts.push(fid.to_string());
            }
        }
        if let Some(summary) = data.get("_summary").and_then(|v| v.as_str())
            && !findings.iter().any(|f| f == summary)
        {
            findings.push(summary.to_string());
        }
    }

    findings.truncate(MAX_KEY_FINDINGS);
    (findings, artifacts)
}

/// Collect raw search-tool results from the transcript for the persisted
/// report.
fn harvest_search_results(transcript: &[Message]) -> Vec<Value> {
    transcript
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter(|m| m.name.as_deref().is_some_and(|n| n.starts_with("tavily_")))
        .filter_map(|m| {
            let output: ToolOutput = serde_json::from_str(&m.text()).ok()?;
            if output.error {
                return None;
            }
            Some(json!({
                "tool": m.name,
                "data": output.data.unwrap_or(Value::Null),
            }))
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Tool;
    use vesper_llm::{ChatResponse, MockClient};
    use vesper_types::ToolCallRequest;

    struct FakeSearch;

    #[async_trait]
    impl Tool for FakeSearch {
        fn name(&self) -> &str {
            "tavily_search"
        }
        fn description(&self) -> &str {
            "Search the web"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _session_id: &str) -> ToolOutput {
            ToolOutput::ok(json!({
                "_summary": "found it",
                "file_id": "fid-42",
                "results": [{"title": "hit", "url": "https://example.org"}]
            }))
        }
    }

    fn deps(dir: &tempfile::TempDir, client: Arc<MockClient>) -> SubAgentDeps {
        let mut models = vesper_llm::ModelManager::for_testing();
        models.register_client("main", Arc::clone(&client) as Arc<dyn vesper_llm::ChatClient>);
        SubAgentDeps {
            models: Arc::new(models),
            todos: Arc::new(TodoStore::new(dir.path().join("todos"))),
            files: Arc::new(FileStore::new(dir.path().join("files"))),
            reports: Arc::new(ReportStore::new(dir.path().join("reports"))),
        }
    }

    fn search_runtime(
        dir: &tempfile::TempDir,
        client: Arc<MockClient>,
        session: &str,
    ) -> SubAgentRuntime {
        let deps = deps(dir, client);
        let policy = Arc::new(PersistedReportPolicy::new(Arc::clone(&deps.reports), "search"));
        let mut tools = ToolManager::new();
        tools.register(FakeSearch);
        SubAgentRuntime::new(SubAgentConfig::search(), tools, deps, policy, session)
    }

    fn plan_response() -> ChatResponse {
        ChatResponse::with_calls(
            "",
            vec![ToolCallRequest::new(
                "c1",
                "create_subagent_todo",
                r#"{"todos":[{"title":"search arXiv","description":"find papers"}]}"#,
            )],
        )
    }

    fn search_response(id: &str) -> ChatResponse {
        ChatResponse::with_calls(
            "",
            vec![ToolCallRequest::new(
                id,
                "tavily_search",
                r#"{"query":"papers"}"#,
            )],
        )
    }

    #[tokio::test]
    async fn full_run_produces_compact_report_with_report_id() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockClient::new(vec![
            plan_response(),
            search_response("c2"),
            ChatResponse::text("Research finished: found one paper."),
        ]));
        let runtime = search_runtime(&dir, Arc::clone(&client), "sess");

        let output = runtime.run("find papers about agents", None).await;
        assert!(!output.error);

        let report: CompactReport = serde_json::from_value(output.data.unwrap()).unwrap();
        assert_eq!(report.subagent, "SearchSubAgent");
        assert_eq!(report.iterations, 3);
        assert_eq!(report.key_findings, vec!["found it".to_string()]);
        assert_eq!(report.artifacts, vec!["fid-42".to_string()]);
        assert_eq!(report.summary, "Research finished: found one paper.");
        assert!(report.report_id.is_some());
    }

    #[tokio::test]
    async fn forced_tool_iterations_do_not_terminate_on_text() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockClient::new(vec![
            ChatResponse::text("I think I can just answer."),
            plan_response(),
            ChatResponse::text("done"),
        ]));
        let runtime = search_runtime(&dir, Arc::clone(&client), "sess");

        let output = runtime.run("task", None).await;
        assert!(!output.error);
        // Three model calls: rejected text, plan, final answer.
        assert_eq!(client.call_count(), 3);

        // The reminder was injected before the second call.
        let calls = client.calls();
        let second_call = &calls[1];
        assert!(
            second_call
                .messages
                .iter()
                .any(|m| m.text().contains("plain-text answer is not accepted"))
        );
    }

    #[tokio::test]
    async fn todo_reuse_skips_creation() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockClient::new(vec![
            plan_response(),
            search_response("c2"),
            ChatResponse::text("continuing existing plan"),
        ]));
        let runtime = search_runtime(&dir, Arc::clone(&client), "sess");

        // Seed two open search TODOs in the session.
        runtime
            .deps
            .todos
            .create(
                "sess",
                TodoCreate {
                    title: "[SearchSubAgent] old task".into(),
                    agent_type: Some(TodoAgentType::Search),
                    ..Default::default()
                },
            )
            .unwrap();
        runtime
            .deps
            .todos
            .create(
                "sess",
                TodoCreate {
                    title: "[SearchSubAgent] older task".into(),
                    agent_type: Some(TodoAgentType::Search),
                    ..Default::default()
                },
            )
            .unwrap();

        let todos = Arc::clone(&runtime.deps.todos);
        let output = runtime.run("task", None).await;
        assert!(!output.error);

        // No new rows appeared.
        assert_eq!(todos.list("sess").unwrap().len(), 2);

        // The create call reported a skip.
        let calls = client.calls();
        let second_call = &calls[1];
        let tool_msg = second_call
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(tool_msg.text().contains("\"skipped\":true"));
    }

    #[tokio::test]
    async fn natural_exit_completes_in_progress_todos() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockClient::new(vec![
            plan_response(),
            ChatResponse::with_calls(
                "",
                vec![ToolCallRequest::new(
                    "c2",
                    "update_subagent_todo",
                    r#"{"index":0,"status":"in_progress"}"#,
                )],
            ),
            ChatResponse::text("all done"),
        ]));
        let runtime = search_runtime(&dir, Arc::clone(&client), "sess");
        let todos = Arc::clone(&runtime.deps.todos);

        let output = runtime.run("task", None).await;
        assert!(!output.error);

        let report: CompactReport = serde_json::from_value(output.data.unwrap()).unwrap();
        assert_eq!(report.todos_completed, 1);
        assert_eq!(report.todos_total, 1);

        // No in_progress items remain in the store for this kind.
        let stored = todos.list("sess").unwrap();
        assert!(
            stored
                .iter()
                .all(|t| t.status != TodoStatus::InProgress)
        );
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn heavy_calls_beyond_budget_get_synthetic_results() {
        unsafe { std::env::set_var(MAX_HEAVY_ENV, "1") };
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockClient::new(vec![
            ChatResponse::with_calls(
                "",
                vec![
                    ToolCallRequest::new("h1", "tavily_search", r#"{"query":"a"}"#),
                    ToolCallRequest::new("h2", "tavily_search", r#"{"query":"b"}"#),
                    ToolCallRequest::new("l1", "update_subagent_todo", r#"{"index":99,"status":"completed"}"#),
                ],
            ),
            plan_response(),
            ChatResponse::text("done"),
        ]));
        let runtime = search_runtime(&dir, Arc::clone(&client), "sess");

        let output = runtime.run("task", None).await;
        unsafe { std::env::remove_var(MAX_HEAVY_ENV) };
        assert!(!output.error);

        // The second model call sees a tool message for every call id of the
        // first round, including the throttled one.
        let calls = client.calls();
        let second_call = &calls[1];
        let tool_ids: Vec<_> = second_call
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.clone())
            .collect();
        assert!(tool_ids.contains(&"h1".to_string()));
        assert!(tool_ids.contains(&"h2".to_string()));
        assert!(tool_ids.contains(&"l1".to_string()));

        let throttled = second_call
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("h2"))
            .unwrap();
        assert!(throttled.text().contains("throttled"));
    }

    #[tokio::test]
    async fn iteration_cap_still_yields_a_report() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockClient::new(vec![
            search_response("c1"),
            search_response("c2"),
        ]));
        let deps = deps(&dir, Arc::clone(&client));
        let mut tools = ToolManager::new();
        tools.register(FakeSearch);
        let mut config = SubAgentConfig::search();
        config.max_iterations = 2;
        let runtime = SubAgentRuntime::new(
            config,
            tools,
            deps,
            Arc::new(InlineReportPolicy),
            "sess",
        );

        let output = runtime.run("task", None).await;
        assert!(!output.error);
        let report: CompactReport = serde_json::from_value(output.data.unwrap()).unwrap();
        assert_eq!(report.iterations, 2);
        assert!(report.report_id.is_none());
    }

    #[tokio::test]
    async fn model_failure_is_a_tool_failure_record() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockClient::new(vec![]));
        let runtime = search_runtime(&dir, client, "sess");

        let output = runtime.run("task", None).await;
        assert!(output.error);
        assert_eq!(output.kind, Some(ToolErrorKind::ToolFailure));
    }

    #[test]
    fn heavy_call_detection() {
        assert!(is_heavy_call("tavily_search"));
        assert!(is_heavy_call("search_subagent"));
        assert!(!is_heavy_call("update_subagent_todo"));
        assert!(!is_heavy_call("list_todos"));
    }

    #[test]
    fn harvest_dedups_and_bounds_findings() {
        let mut transcript = Vec::new();
        for i in 0..15 {
            let output = ToolOutput::ok(json!({
                "_summary": format!("finding {}", i % 12),
                "file_id": format!("fid-{}", i % 3),
            }));
            transcript.push(Message::tool(
                format!("c{i}"),
                "tavily_search",
                output.to_json_string(),
            ));
        }

        let (findings, artifacts) = harvest_tool_results(&transcript);
        assert_eq!(findings.len(), MAX_KEY_FINDINGS);
        assert_eq!(artifacts.len(), 3);
    }
}
