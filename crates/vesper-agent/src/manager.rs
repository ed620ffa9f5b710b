//! Unified tool registry and dispatch.
//!
//! The [`ToolManager`] is the single source of truth for the tools exposed to
//! an agent and the only path through which they are invoked. Dispatch
//! enforces per-call deadlines, injects the session id into session-scoped
//! tools, and bounds batch concurrency with a semaphore while preserving
//! input order in the output.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::tool::{Tool, ToolErrorKind, ToolOutput};
use vesper_llm::ToolDefinition;
use vesper_types::{Message, ToolCallRequest};

/// Env knob for the per-call deadline, seconds.
const TIMEOUT_ENV: &str = "TOOL_EXECUTION_TIMEOUT";

/// Default per-call deadline, seconds.
const DEFAULT_TIMEOUT_SECS: i64 = 120;

/// Deadline substituted for non-positive timeouts ("effectively infinite").
const UNBOUNDED_TIMEOUT_SECS: u64 = 1_000_000_000;

/// Env knob for batch dispatch concurrency.
const CONCURRENCY_ENV: &str = "MAX_TOOL_CONCURRENCY";

/// Default batch concurrency, deliberately low to spare upstream APIs.
const DEFAULT_CONCURRENCY: usize = 1;

/// Tool names that receive the session id automatically.
const TODO_TOOLS: &[&str] = &[
    "list_todos",
    "create_todo",
    "update_todo",
    "delete_todo",
    "reorder_todos",
];

// ─────────────────────────────────────────────────────────────────────────────
// Dispatched result
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one dispatched call, paired with its originating call id.
#[derive(Debug, Clone)]
pub struct DispatchedCall {
    /// Id of the originating tool call.
    pub tool_call_id: String,
    /// Name of the tool.
    pub tool_name: String,
    /// The normalised result.
    pub output: ToolOutput,
}

impl DispatchedCall {
    /// The `tool` message recording this result in the transcript.
    pub fn to_message(&self) -> Message {
        Message::tool(
            &self.tool_call_id,
            &self.tool_name,
            self.output.to_json_string(),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ToolManager
// ─────────────────────────────────────────────────────────────────────────────

/// Registry and dispatcher for agent tools.
#[derive(Default, Clone)]
pub struct ToolManager {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a tool from an `Arc`.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered tool names, in stable order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// A new registry containing only the named tools. Unknown names are
    /// silently ignored.
    pub fn filtered(&self, names: &[&str]) -> ToolManager {
        let tools = names
            .iter()
            .filter_map(|&name| {
                self.tools
                    .get(name)
                    .map(|t| (name.to_string(), Arc::clone(t)))
            })
            .collect();
        ToolManager { tools }
    }

    /// Markdown tool list for the system prompt.
    pub fn describe_all(&self) -> String {
        self.tools
            .values()
            .map(|t| format!("### {}\n{}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Chat-completions definitions for all registered tools.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Execute one tool with deadline and session injection.
    ///
    /// The deadline is `args._timeout` when present, else
    /// `TOOL_EXECUTION_TIMEOUT`, else 120 seconds; non-positive values mean
    /// "effectively no timeout". Unknown tools, deadline overruns and task
    /// failures are all returned as result records, never raised.
    pub async fn execute_tool(&self, name: &str, args: Value, session_id: &str) -> ToolOutput {
        let Some(tool) = self.get(name) else {
            return ToolOutput::failure(
                ToolErrorKind::UnknownTool,
                format!("unknown tool: {name}"),
            );
        };

        let timeout = call_timeout(&args);
        let args = inject_session_id(name, args, session_id);
        let session = session_id.to_string();

        tracing::info!(tool = name, timeout_secs = timeout.as_secs(), "executing tool");
        let start = Instant::now();

        let handle = tokio::spawn(async move { tool.execute(args, &session).await });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(output)) => {
                tracing::info!(
                    tool = name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = output.error,
                    "tool finished"
                );
                output
            }
            Ok(Err(join_err)) => {
                tracing::error!(tool = name, error = %join_err, "tool task failed");
                ToolOutput::failure(
                    ToolErrorKind::ToolFailure,
                    format!("tool task failed: {join_err}"),
                )
            }
            Err(_) => {
                tracing::error!(
                    tool = name,
                    timeout_secs = timeout.as_secs(),
                    "tool timed out"
                );
                ToolOutput::failure(
                    ToolErrorKind::Timeout,
                    format!(
                        "tool execution timed out after {}s: {name}",
                        timeout.as_secs()
                    ),
                )
            }
        }
    }

    /// Execute a batch of tool calls.
    ///
    /// Concurrency is bounded by `MAX_TOOL_CONCURRENCY` (default 1); the
    /// output vector matches the input order index-wise regardless of
    /// completion order. Argument parse failures surface as
    /// `ArgumentParseError` records at the corresponding index.
    pub async fn execute_tool_calls(
        &self,
        calls: &[ToolCallRequest],
        session_id: &str,
    ) -> Vec<DispatchedCall> {
        let semaphore = Arc::new(Semaphore::new(max_concurrency()));

        let futures = calls.iter().map(|call| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let args = match parse_arguments(call.arguments()) {
                    Ok(args) => args,
                    Err(message) => {
                        return DispatchedCall {
                            tool_call_id: call.id.clone(),
                            tool_name: call.name().to_string(),
                            output: ToolOutput::failure(
                                ToolErrorKind::ArgumentParseError,
                                message,
                            ),
                        };
                    }
                };

                // Semaphore errors only happen when the semaphore is closed,
                // which we never do.
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                let output = self.execute_tool(call.name(), args, session_id).await;

                DispatchedCall {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name().to_string(),
                    output,
                }
            }
        });

        futures::future::join_all(futures).await
    }
}

impl std::fmt::Debug for ToolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolManager")
            .field("tools", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_arguments(raw: &str) -> std::result::Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON arguments: {e}"))
}

fn call_timeout(args: &Value) -> Duration {
    let secs = args
        .get("_timeout")
        .and_then(|v| v.as_i64())
        .or_else(|| {
            std::env::var(TIMEOUT_ENV)
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
        })
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    if secs <= 0 {
        Duration::from_secs(UNBOUNDED_TIMEOUT_SECS)
    } else {
        Duration::from_secs(secs as u64)
    }
}

fn max_concurrency() -> usize {
    std::env::var(CONCURRENCY_ENV)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .map(|v| if v <= 0 { 1 } else { v as usize })
        .unwrap_or(DEFAULT_CONCURRENCY)
}

/// Sub-agent and TODO tools operate on session-scoped state; give them the
/// session id when the caller did not.
fn inject_session_id(name: &str, mut args: Value, session_id: &str) -> Value {
    let session_scoped = name.ends_with("_subagent") || TODO_TOOLS.contains(&name);
    if session_scoped
        && let Some(obj) = args.as_object_mut()
        && !obj.contains_key("session_id")
    {
        obj.insert(
            "session_id".to_string(),
            Value::String(session_id.to_string()),
        );
    }
    args
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serial_test::serial;
    use std::sync::Mutex;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the arguments back"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value, _session_id: &str) -> ToolOutput {
            ToolOutput::ok(args)
        }
    }

    struct SleepTool {
        millis: u64,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            "sleep"
        }
        fn description(&self) -> &str {
            "Sleep for a while"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _session_id: &str) -> ToolOutput {
            tokio::time::sleep(Duration::from_millis(self.millis)).await;
            ToolOutput::ok(json!({"slept_ms": self.millis}))
        }
    }

    /// Records how many executions overlap, to assert the concurrency bound.
    struct GaugeTool {
        active: Arc<Mutex<(usize, usize)>>, // (current, max)
    }

    #[async_trait]
    impl Tool for GaugeTool {
        fn name(&self) -> &str {
            "gauge"
        }
        fn description(&self) -> &str {
            "Track concurrent executions"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _session_id: &str) -> ToolOutput {
            {
                let mut state = self.active.lock().unwrap();
                state.0 += 1;
                state.1 = state.1.max(state.0);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.lock().unwrap().0 -= 1;
            ToolOutput::ok(json!({}))
        }
    }

    struct SessionProbe;

    #[async_trait]
    impl Tool for SessionProbe {
        fn name(&self) -> &str {
            "list_todos"
        }
        fn description(&self) -> &str {
            "Probe injected session id"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value, _session_id: &str) -> ToolOutput {
            ToolOutput::ok(args)
        }
    }

    fn manager_with(tools: Vec<Arc<dyn Tool>>) -> ToolManager {
        let mut manager = ToolManager::new();
        for tool in tools {
            manager.register_arc(tool);
        }
        manager
    }

    #[tokio::test]
    async fn unknown_tool_is_a_result_not_an_error() {
        let manager = ToolManager::new();
        let out = manager.execute_tool("ghost", json!({}), "s").await;
        assert!(out.error);
        assert_eq!(out.kind, Some(ToolErrorKind::UnknownTool));
    }

    #[tokio::test]
    async fn execute_runs_the_tool() {
        let manager = manager_with(vec![Arc::new(EchoTool)]);
        let out = manager
            .execute_tool("echo", json!({"x": 1}), "s")
            .await;
        assert!(!out.error);
        assert_eq!(out.data.unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn per_call_timeout_wins() {
        let manager = manager_with(vec![Arc::new(SleepTool { millis: 500 })]);
        let out = manager
            .execute_tool("sleep", json!({"_timeout": 1}), "s")
            .await;
        // 1 second timeout, 500ms sleep: finishes.
        assert!(!out.error);
    }

    #[tokio::test]
    async fn deadline_expires_slow_tools() {
        // 1s deadline against a 1.5s sleep.
        let manager = manager_with(vec![Arc::new(SleepTool { millis: 1500 })]);
        let out = manager
            .execute_tool("sleep", json!({"_timeout": 1}), "s")
            .await;
        assert!(out.error);
        assert_eq!(out.kind, Some(ToolErrorKind::Timeout));
    }

    #[tokio::test]
    async fn non_positive_timeout_means_unbounded() {
        let args = json!({"_timeout": 0});
        assert_eq!(
            call_timeout(&args),
            Duration::from_secs(UNBOUNDED_TIMEOUT_SECS)
        );
        let args = json!({"_timeout": -5});
        assert_eq!(
            call_timeout(&args),
            Duration::from_secs(UNBOUNDED_TIMEOUT_SECS)
        );
    }

    #[tokio::test]
    async fn session_id_is_injected_for_todo_tools() {
        let manager = manager_with(vec![Arc::new(SessionProbe)]);
        let out = manager.execute_tool("list_todos", json!({}), "sess-9").await;
        assert_eq!(out.data.unwrap()["session_id"], "sess-9");
    }

    #[tokio::test]
    async fn caller_supplied_session_id_wins() {
        let manager = manager_with(vec![Arc::new(SessionProbe)]);
        let out = manager
            .execute_tool("list_todos", json!({"session_id": "explicit"}), "sess-9")
            .await;
        assert_eq!(out.data.unwrap()["session_id"], "explicit");
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let manager = manager_with(vec![
            Arc::new(EchoTool),
            Arc::new(SleepTool { millis: 100 }),
        ]);
        let calls = vec![
            ToolCallRequest::new("c1", "sleep", "{}"),
            ToolCallRequest::new("c2", "echo", r#"{"n":2}"#),
            ToolCallRequest::new("c3", "echo", r#"{"n":3}"#),
        ];

        let results = manager.execute_tool_calls(&calls, "s").await;
        let ids: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn malformed_arguments_fail_at_their_index() {
        let manager = manager_with(vec![Arc::new(EchoTool)]);
        let calls = vec![
            ToolCallRequest::new("c1", "echo", "{not json"),
            ToolCallRequest::new("c2", "echo", r#"{"ok":true}"#),
        ];

        let results = manager.execute_tool_calls(&calls, "s").await;
        assert_eq!(
            results[0].output.kind,
            Some(ToolErrorKind::ArgumentParseError)
        );
        assert!(!results[1].output.error);
    }

    #[tokio::test]
    async fn empty_arguments_mean_empty_object() {
        let manager = manager_with(vec![Arc::new(EchoTool)]);
        let calls = vec![ToolCallRequest::new("c1", "echo", "")];
        let results = manager.execute_tool_calls(&calls, "s").await;
        assert!(!results[0].output.error);
    }

    #[tokio::test]
    #[serial]
    async fn concurrency_is_bounded_by_env() {
        unsafe { std::env::set_var(CONCURRENCY_ENV, "2") };
        let active = Arc::new(Mutex::new((0usize, 0usize)));
        let manager = manager_with(vec![Arc::new(GaugeTool {
            active: Arc::clone(&active),
        })]);

        let calls: Vec<_> = (0..4)
            .map(|i| ToolCallRequest::new(format!("c{i}"), "gauge", "{}"))
            .collect();
        let start = Instant::now();
        let results = manager.execute_tool_calls(&calls, "s").await;
        let elapsed = start.elapsed();
        unsafe { std::env::remove_var(CONCURRENCY_ENV) };

        assert_eq!(results.len(), 4);
        assert!(active.lock().unwrap().1 <= 2, "observed more than 2 concurrent");
        // 4 calls of 50ms at concurrency 2: two waves.
        assert!(elapsed >= Duration::from_millis(100));
    }

    #[tokio::test]
    #[serial]
    async fn default_concurrency_serialises_calls() {
        unsafe { std::env::remove_var(CONCURRENCY_ENV) };
        let active = Arc::new(Mutex::new((0usize, 0usize)));
        let manager = manager_with(vec![Arc::new(GaugeTool {
            active: Arc::clone(&active),
        })]);

        let calls: Vec<_> = (0..3)
            .map(|i| ToolCallRequest::new(format!("c{i}"), "gauge", "{}"))
            .collect();
        manager.execute_tool_calls(&calls, "s").await;
        assert_eq!(active.lock().unwrap().1, 1);
    }

    #[test]
    fn filtered_keeps_only_named_tools() {
        let manager = manager_with(vec![
            Arc::new(EchoTool),
            Arc::new(SleepTool { millis: 1 }),
        ]);
        let subset = manager.filtered(&["echo", "ghost"]);
        assert!(subset.contains("echo"));
        assert!(!subset.contains("sleep"));
        assert_eq!(subset.len(), 1);
    }

    #[test]
    fn describe_all_lists_tools() {
        let manager = manager_with(vec![Arc::new(EchoTool)]);
        let described = manager.describe_all();
        assert!(described.contains("### echo"));
        assert!(described.contains("Echo the arguments back"));
    }

    #[test]
    fn dispatched_call_builds_tool_message() {
        let call = DispatchedCall {
            tool_call_id: "c1".into(),
            tool_name: "echo".into(),
            output: ToolOutput::ok(json!({"x": 1})),
        };
        let msg = call.to_message();
        assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(msg.name.as_deref(), Some("echo"));
        assert!(msg.text().contains("\"x\":1"));
    }
}
