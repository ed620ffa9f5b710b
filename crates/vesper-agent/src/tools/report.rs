//! Report tools over the [`ReportStore`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::manager::ToolManager;
use crate::tool::{Tool, ToolErrorKind, ToolOutput};
use vesper_store::ReportStore;

/// Default number of entries returned by `list_reports`.
const DEFAULT_LIST_LIMIT: usize = 10;

/// Register the three report tools.
pub fn register(manager: &mut ToolManager, reports: Arc<ReportStore>) {
    manager.register(ReadReport {
        reports: Arc::clone(&reports),
    });
    manager.register(ListReports {
        reports: Arc::clone(&reports),
    });
    manager.register(DeleteReport { reports });
}

struct ReadReport {
    reports: Arc<ReportStore>,
}

#[async_trait]
impl Tool for ReadReport {
    fn name(&self) -> &str {
        "read_report"
    }

    fn description(&self) -> &str {
        "Read the full markdown report behind a report_id returned by a sub-agent, \
         including detailed search results, the TODO record and key findings."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "report_id": {"type": "string", "description": "Id of the report to read"}
            },
            "required": ["report_id"]
        })
    }

    async fn execute(&self, args: Value, _session_id: &str) -> ToolOutput {
        let Some(report_id) = args.get("report_id").and_then(|v| v.as_str()) else {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, "missing report_id");
        };
        match self.reports.read(report_id) {
            Ok(Some(content)) => ToolOutput::ok(json!({
                "report_id": report_id,
                "content": content,
            })),
            Ok(None) => ToolOutput::failure(
                ToolErrorKind::ToolFailure,
                format!("no report with id {report_id}"),
            ),
            Err(e) => ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string()),
        }
    }
}

struct ListReports {
    reports: Arc<ReportStore>,
}

#[async_trait]
impl Tool for ListReports {
    fn name(&self) -> &str {
        "list_reports"
    }

    fn description(&self) -> &str {
        "List the most recent sub-agent reports with their report_ids, newest first."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of reports to return (default 10)",
                    "default": DEFAULT_LIST_LIMIT
                }
            }
        })
    }

    async fn execute(&self, args: Value, _session_id: &str) -> ToolOutput {
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_LIST_LIMIT);
        match self.reports.list(limit) {
            Ok(entries) => {
                let count = entries.len();
                ToolOutput::ok(json!({ "reports": entries, "count": count }))
            }
            Err(e) => ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string()),
        }
    }
}

struct DeleteReport {
    reports: Arc<ReportStore>,
}

#[async_trait]
impl Tool for DeleteReport {
    fn name(&self) -> &str {
        "delete_report"
    }

    fn description(&self) -> &str {
        "Delete a stored report by report_id. This cannot be undone."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "report_id": {"type": "string", "description": "Id of the report to delete"}
            },
            "required": ["report_id"]
        })
    }

    async fn execute(&self, args: Value, _session_id: &str) -> ToolOutput {
        let Some(report_id) = args.get("report_id").and_then(|v| v.as_str()) else {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, "missing report_id");
        };
        match self.reports.delete(report_id) {
            Ok(true) => ToolOutput::ok(json!({ "deleted": true, "report_id": report_id })),
            Ok(false) => ToolOutput::failure(
                ToolErrorKind::ToolFailure,
                format!("no report with id {report_id}"),
            ),
            Err(e) => ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_store::ReportFields;

    fn manager() -> (tempfile::TempDir, Arc<ReportStore>, ToolManager) {
        let dir = tempfile::tempdir().unwrap();
        let reports = Arc::new(ReportStore::new(dir.path()));
        let mut manager = ToolManager::new();
        register(&mut manager, Arc::clone(&reports));
        (dir, reports, manager)
    }

    #[tokio::test]
    async fn read_list_delete_through_tools() {
        let (_dir, reports, manager) = manager();
        let id = reports
            .save(
                "search",
                &ReportFields {
                    task_description: "find things".into(),
                    summary: "found them".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        let read = manager
            .execute_tool("read_report", json!({"report_id": id}), "s")
            .await;
        assert!(!read.error);
        assert!(
            read.data.unwrap()["content"]
                .as_str()
                .unwrap()
                .contains("found them")
        );

        let listed = manager.execute_tool("list_reports", json!({}), "s").await;
        assert_eq!(listed.data.unwrap()["count"], 1);

        let deleted = manager
            .execute_tool("delete_report", json!({"report_id": id}), "s")
            .await;
        assert!(!deleted.error);

        let gone = manager
            .execute_tool("read_report", json!({"report_id": id}), "s")
            .await;
        assert!(gone.error);
    }
}
