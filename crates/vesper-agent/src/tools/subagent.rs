//! Sub-agent wrapper tools.
//!
//! Each wrapper exposes one sub-agent kind as an ordinary tool. Invoking it
//! instantiates an isolated [`SubAgentRuntime`] bound to the caller's
//! session and returns the compact report as the tool's data payload.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::manager::ToolManager;
use crate::subagent::{
    InlineReportPolicy, PersistedReportPolicy, ReportPolicy, SubAgentConfig, SubAgentDeps,
    SubAgentRuntime,
};
use crate::tool::{Tool, ToolErrorKind, ToolOutput};

/// A sub-agent kind packaged as a tool.
pub struct SubAgentTool {
    name: &'static str,
    description: String,
    config: SubAgentConfig,
    deps: SubAgentDeps,
    tools: ToolManager,
    policy: Arc<dyn ReportPolicy>,
}

impl SubAgentTool {
    /// The deep-search sub-agent (`search_subagent`), persisting full
    /// reports to the report store.
    pub fn search(deps: SubAgentDeps, tools: ToolManager) -> Self {
        let policy = Arc::new(PersistedReportPolicy::new(
            Arc::clone(&deps.reports),
            "search",
        ));
        Self {
            name: "search_subagent",
            description: "Delegate deep web research to a specialised sub-agent: academic \
                 papers, technical documentation, multi-source comparison. The sub-agent \
                 plans its own TODO list, runs the search tools and returns a compact \
                 report plus a report_id for the full document. For a quick lookup use \
                 tavily_search directly instead."
                .to_string(),
            config: SubAgentConfig::search(),
            deps,
            tools,
            policy,
        }
    }

    /// The browser-automation sub-agent (`browser_subagent`).
    pub fn browser(deps: SubAgentDeps, tools: ToolManager) -> Self {
        Self {
            name: "browser_subagent",
            description: "Delegate a multi-step browser task to a specialised sub-agent: \
                 navigate, log in, fill forms, capture screenshots. The sub-agent plans \
                 its own TODO list and returns a compact report with artifact file ids."
                .to_string(),
            config: SubAgentConfig::browser(),
            deps,
            tools,
            policy: Arc::new(InlineReportPolicy),
        }
    }

    /// The desktop-control sub-agent (`windows_subagent`).
    pub fn windows(deps: SubAgentDeps, tools: ToolManager) -> Self {
        Self {
            name: "windows_subagent",
            description: "Delegate a desktop automation task to a specialised sub-agent: \
                 launch applications, drive UI elements, run commands. The sub-agent \
                 plans its own TODO list and returns a compact report."
                .to_string(),
            config: SubAgentConfig::windows(),
            deps,
            tools,
            policy: Arc::new(InlineReportPolicy),
        }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_description": {
                    "type": "string",
                    "description": "What the sub-agent should accomplish; it plans its own steps"
                },
                "context": {
                    "type": "object",
                    "description": "Optional context such as URLs, paths or credentials"
                }
            },
            "required": ["task_description"]
        })
    }

    async fn execute(&self, args: Value, session_id: &str) -> ToolOutput {
        let Some(task) = args.get("task_description").and_then(|v| v.as_str()) else {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, "missing task_description");
        };
        let context = args.get("context").cloned().filter(|v| !v.is_null());

        // The dispatch layer injects the session id; fall back to the
        // execution context for direct calls.
        let session = args
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or(session_id);

        let runtime = SubAgentRuntime::new(
            self.config.clone(),
            self.tools.clone(),
            self.deps.clone(),
            Arc::clone(&self.policy),
            session,
        );
        runtime.run(task, context).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subagent::CompactReport;
    use vesper_llm::{ChatResponse, MockClient, ModelManager};
    use vesper_store::{FileStore, ReportStore, TodoStore};
    use vesper_types::ToolCallRequest;

    fn deps(dir: &tempfile::TempDir, client: Arc<MockClient>) -> SubAgentDeps {
        let mut models = ModelManager::for_testing();
        models.register_client("main", client);
        SubAgentDeps {
            models: Arc::new(models),
            todos: Arc::new(TodoStore::new(dir.path().join("todos"))),
            files: Arc::new(FileStore::new(dir.path().join("files"))),
            reports: Arc::new(ReportStore::new(dir.path().join("reports"))),
        }
    }

    #[tokio::test]
    async fn wrapper_runs_the_runtime_and_returns_a_report() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockClient::new(vec![
            ChatResponse::with_calls(
                "",
                vec![ToolCallRequest::new(
                    "c1",
                    "create_subagent_todo",
                    r#"{"todos":[{"title":"step"}]}"#,
                )],
            ),
            ChatResponse::with_calls(
                "",
                vec![ToolCallRequest::new(
                    "c2",
                    "update_subagent_todo",
                    r#"{"index":0,"status":"completed"}"#,
                )],
            ),
            ChatResponse::text("browser task finished"),
        ]));

        let tool = SubAgentTool::browser(deps(&dir, client), ToolManager::new());
        let out = tool
            .execute(json!({"task_description": "open the page"}), "sess-1")
            .await;

        assert!(!out.error);
        let report: CompactReport = serde_json::from_value(out.data.unwrap()).unwrap();
        assert_eq!(report.subagent, "BrowserSubAgent");
        assert_eq!(report.todos_completed, 1);
        assert!(report.report_id.is_none());
    }

    #[tokio::test]
    async fn missing_task_description_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockClient::new(vec![]));
        let tool = SubAgentTool::windows(deps(&dir, client), ToolManager::new());
        let out = tool.execute(json!({}), "sess-1").await;
        assert!(out.error);
    }
}
