//! Durable sub-agent reports.
//!
//! Reports are append-only markdown documents organised as
//! `<root>/<kind>/YYYY-MM-DD/<report_id>.md`, where the id is
//! `YYYYMMDD_HHMMSS_<8 hex chars of the task hash>`. The parent agent only
//! ever receives the compact record plus this id; the full document is read
//! back on demand.

use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use vesper_types::TodoStatus;

// ─────────────────────────────────────────────────────────────────────────────
// Fields
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of one planner item at report time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoProgress {
    /// Item title.
    pub title: String,
    /// Status at report time.
    pub status: TodoStatus,
}

/// Everything that goes into a persisted report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportFields {
    /// The task the sub-agent was given.
    pub task_description: String,
    /// Execution summary.
    pub summary: String,
    /// Planner snapshot.
    #[serde(default)]
    pub todos: Vec<TodoProgress>,
    /// Raw per-call search results harvested from the transcript.
    #[serde(default)]
    pub search_results: Vec<Value>,
    /// Key findings.
    #[serde(default)]
    pub key_findings: Vec<String>,
    /// File ids of artifacts produced during the run.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Number of loop iterations used.
    #[serde(default)]
    pub iterations: u32,
    /// Free-form metadata, rendered as JSON.
    #[serde(default)]
    pub metadata: Value,
}

/// A listing entry for a stored report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Report id.
    pub report_id: String,
    /// Date folder the report lives in.
    pub date: String,
    /// Full path on disk.
    pub path: String,
    /// File modification time, seconds since the epoch.
    pub created_at: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only store of sub-agent reports.
#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Render and persist a report under the given sub-agent kind.
    /// Returns the generated report id.
    pub fn save(&self, kind: &str, fields: &ReportFields) -> Result<String> {
        let report_id = generate_report_id(&fields.task_description);
        let date = Local::now().format("%Y-%m-%d").to_string();
        let dir = self.root.join(kind).join(&date);
        std::fs::create_dir_all(&dir)?;

        let markdown = render_markdown(&report_id, fields);
        let path = dir.join(format!("{report_id}.md"));
        crate::write_atomic(&path, &markdown)?;

        tracing::info!(%report_id, kind, "report persisted");
        Ok(report_id)
    }

    /// Read a report by id, scanning kinds and date folders newest-first.
    pub fn read(&self, report_id: &str) -> Result<Option<String>> {
        match self.find(report_id)? {
            Some(path) => Ok(Some(std::fs::read_to_string(path)?)),
            None => Ok(None),
        }
    }

    /// List up to `limit` reports, newest-first.
    pub fn list(&self, limit: usize) -> Result<Vec<ReportEntry>> {
        let mut entries = Vec::new();
        for kind_dir in sorted_dirs(&self.root, true)? {
            for date_dir in sorted_dirs(&kind_dir, true)? {
                let date = date_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                for file in sorted_markdown_files(&date_dir, true)? {
                    let report_id = file
                        .file_stem()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let created_at = file
                        .metadata()
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_secs_f64())
                        .unwrap_or(0.0);

                    entries.push(ReportEntry {
                        report_id,
                        date: date.clone(),
                        path: file.to_string_lossy().into_owned(),
                        created_at,
                    });
                }
            }
        }

        entries.sort_by(|a, b| b.report_id.cmp(&a.report_id));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Delete a report by id; `false` when it does not exist.
    pub fn delete(&self, report_id: &str) -> Result<bool> {
        match self.find(report_id)? {
            Some(path) => {
                std::fs::remove_file(path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find(&self, report_id: &str) -> Result<Option<PathBuf>> {
        let file_name = format!("{report_id}.md");
        for kind_dir in sorted_dirs(&self.root, true)? {
            for date_dir in sorted_dirs(&kind_dir, true)? {
                let candidate = date_dir.join(&file_name);
                if candidate.exists() {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }
}

/// `YYYYMMDD_HHMMSS_<8 hex>` from the local timestamp and task digest.
fn generate_report_id(task_description: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let digest = Sha256::digest(task_description.as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{timestamp}_{hash}")
}

fn sorted_dirs(root: &Path, newest_first: bool) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    if newest_first {
        dirs.reverse();
    }
    Ok(dirs)
}

fn sorted_markdown_files(dir: &Path, newest_first: bool) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "md"))
        .collect();
    files.sort();
    if newest_first {
        files.reverse();
    }
    Ok(files)
}

fn render_markdown(report_id: &str, fields: &ReportFields) -> String {
    let task_heading = if fields.task_description.chars().count() > 50 {
        let head: String = fields.task_description.chars().take(50).collect();
        format!("{head}...")
    } else {
        fields.task_description.clone()
    };
    let report_time = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let todo_section = if fields.todos.is_empty() {
        "(no TODO records)".to_string()
    } else {
        fields
            .todos
            .iter()
            .map(|t| {
                let mark = match t.status {
                    TodoStatus::Completed => "x",
                    TodoStatus::InProgress => "~",
                    TodoStatus::Pending => " ",
                };
                format!("- [{mark}] {}", t.title)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let search_section = if fields.search_results.is_empty() {
        "(no detailed search results)".to_string()
    } else {
        fields
            .search_results
            .iter()
            .enumerate()
            .map(|(idx, result)| render_search_result(idx + 1, result))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let findings_section = if fields.key_findings.is_empty() {
        "(no key findings)".to_string()
    } else {
        fields
            .key_findings
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{}. {f}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let artifacts_section = if fields.artifacts.is_empty() {
        "(no artifacts)".to_string()
    } else {
        fields
            .artifacts
            .iter()
            .map(|a| format!("- {a}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let metadata_json =
        serde_json::to_string_pretty(&fields.metadata).unwrap_or_else(|_| "{}".to_string());

    format!(
        "# Deep search report - {task_heading}\n\n\
         **Report ID**: {report_id}\n\
         **Generated**: {report_time}\n\
         **Task**: {task}\n\
         **Iterations**: {iterations}\n\n\
         ---\n\n\
         ## Summary\n\n{summary}\n\n\
         ---\n\n\
         ## TODO execution record\n\n{todo_section}\n\n\
         ---\n\n\
         ## Detailed search results\n\n{search_section}\n\n\
         ---\n\n\
         ## Key findings\n\n{findings_section}\n\n\
         ---\n\n\
         ## Artifacts\n\n{artifacts_section}\n\n\
         ---\n\n\
         ## Metadata\n\n```json\n{metadata_json}\n```\n",
        task = fields.task_description,
        iterations = fields.iterations,
        summary = fields.summary,
    )
}

fn render_search_result(index: usize, result: &Value) -> String {
    let tool = result
        .get("tool")
        .and_then(|t| t.as_str())
        .unwrap_or("unknown");
    let mut lines = vec![format!("### Search {index}: {tool}")];

    if let Some(query) = result.get("query").and_then(|q| q.as_str()) {
        lines.push(format!("**Query**: {query}"));
    }

    if let Some(results) = result
        .get("data")
        .and_then(|d| d.get("results"))
        .and_then(|r| r.as_array())
    {
        for (i, entry) in results.iter().take(5).enumerate() {
            let title = entry
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or("untitled");
            lines.push(format!("\n**{}. {title}**", i + 1));
            if let Some(url) = entry.get("url").and_then(|u| u.as_str()) {
                lines.push(format!("- URL: {url}"));
            }
            if let Some(content) = entry.get("content").and_then(|c| c.as_str()) {
                let snippet: String = content.chars().take(200).collect();
                lines.push(format!("- Excerpt: {snippet}..."));
            }
        }
    }

    lines.join("\n")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(task: &str) -> ReportFields {
        ReportFields {
            task_description: task.to_string(),
            summary: "Found three relevant papers.".to_string(),
            todos: vec![
                TodoProgress {
                    title: "search arXiv".into(),
                    status: TodoStatus::Completed,
                },
                TodoProgress {
                    title: "cross-check".into(),
                    status: TodoStatus::Pending,
                },
            ],
            search_results: vec![json!({
                "tool": "tavily_search",
                "query": "retrieval augmentation",
                "data": {"results": [
                    {"title": "Paper A", "url": "https://example.org/a", "content": "abstract text"}
                ]}
            })],
            key_findings: vec!["Paper A is canonical".into()],
            artifacts: vec!["fid-1".into()],
            iterations: 4,
            metadata: json!({"model": "test"}),
        }
    }

    #[test]
    fn report_id_shape() {
        let id = generate_report_id("some task");
        let parts: Vec<_> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn same_task_yields_same_hash_suffix() {
        let a = generate_report_id("task");
        let b = generate_report_id("task");
        assert_eq!(a.rsplit('_').next(), b.rsplit('_').next());
    }

    #[test]
    fn save_then_read_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());

        let id = store.save("search", &fields("find papers")).unwrap();
        let first = store.read(&id).unwrap().unwrap();
        let second = store.read(&id).unwrap().unwrap();
        assert_eq!(first, second);
        assert!(first.contains("## Summary"));
        assert!(first.contains("Found three relevant papers."));
        assert!(first.contains("- [x] search arXiv"));
        assert!(first.contains("- [ ] cross-check"));
        assert!(first.contains("Paper A"));
        assert!(first.contains("```json"));
    }

    #[test]
    fn read_unknown_id_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        assert!(store.read("20200101_000000_deadbeef").unwrap().is_none());
    }

    #[test]
    fn list_is_newest_first_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());

        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(store.save("search", &fields(&format!("task {i}"))).unwrap());
        }

        let listed = store.list(2).unwrap();
        assert_eq!(listed.len(), 2);
        // All saved within the same second sort by the hash suffix; the
        // listing must still cover only stored ids.
        for entry in &listed {
            assert!(ids.contains(&entry.report_id));
            assert!(!entry.date.is_empty());
        }
    }

    #[test]
    fn delete_removes_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());

        let id = store.save("search", &fields("victim")).unwrap();
        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert!(store.read(&id).unwrap().is_none());
    }

    #[test]
    fn kinds_are_separated_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());

        let id = store.save("browser", &fields("navigate")).unwrap();
        assert!(dir.path().join("browser").exists());
        assert!(store.read(&id).unwrap().is_some());
    }
}
