//! Cached-file tools over the [`FileStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::manager::ToolManager;
use crate::tool::{Tool, ToolErrorKind, ToolOutput};
use vesper_store::FileStore;

/// Default cleanup age, hours (30 days).
const DEFAULT_MAX_AGE_HOURS: u64 = 720;

/// Default cleanup size budget, megabytes.
const DEFAULT_MAX_TOTAL_MB: u64 = 500;

/// Register the four cached-file tools.
pub fn register(manager: &mut ToolManager, files: Arc<FileStore>) {
    manager.register(SaveCachedFile {
        files: Arc::clone(&files),
    });
    manager.register(ListCachedFiles {
        files: Arc::clone(&files),
    });
    manager.register(StorageStatsTool {
        files: Arc::clone(&files),
    });
    manager.register(CleanupStorage { files });
}

struct SaveCachedFile {
    files: Arc<FileStore>,
}

#[async_trait]
impl Tool for SaveCachedFile {
    fn name(&self) -> &str {
        "save_cached_file"
    }

    fn description(&self) -> &str {
        "Copy a cached file (referenced by file_id) to a local path. Use this to keep \
         screenshots, PDFs or long responses that tools have cached."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_id": {"type": "string", "description": "Id of the cached file"},
                "target_path": {"type": "string", "description": "Destination path on disk"}
            },
            "required": ["file_id", "target_path"]
        })
    }

    async fn execute(&self, args: Value, _session_id: &str) -> ToolOutput {
        let Some(file_id) = args.get("file_id").and_then(|v| v.as_str()) else {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, "missing file_id");
        };
        let Some(target) = args.get("target_path").and_then(|v| v.as_str()) else {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, "missing target_path");
        };
        let Some(bytes) = self.files.get_bytes(file_id) else {
            return ToolOutput::failure(
                ToolErrorKind::ToolFailure,
                format!("no cached file with id {file_id}"),
            );
        };

        if let Some(parent) = std::path::Path::new(target).parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string());
        }
        if let Err(e) = std::fs::write(target, &bytes) {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string());
        }

        ToolOutput::ok(json!({
            "file_id": file_id,
            "saved_to": target,
            "size": bytes.len(),
            "_summary": format!("saved cached file {file_id} to {target}"),
        }))
    }
}

struct ListCachedFiles {
    files: Arc<FileStore>,
}

#[async_trait]
impl Tool for ListCachedFiles {
    fn name(&self) -> &str {
        "list_cached_files"
    }

    fn description(&self) -> &str {
        "List all cached files with their file_id, kind and size."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _args: Value, _session_id: &str) -> ToolOutput {
        let files = self.files.list();
        let count = files.len();
        ToolOutput::ok(json!({ "files": files, "count": count }))
    }
}

struct StorageStatsTool {
    files: Arc<FileStore>,
}

#[async_trait]
impl Tool for StorageStatsTool {
    fn name(&self) -> &str {
        "storage_stats"
    }

    fn description(&self) -> &str {
        "Show cache statistics: file count, total size and per-kind breakdown."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _args: Value, _session_id: &str) -> ToolOutput {
        match serde_json::to_value(self.files.stats()) {
            Ok(stats) => ToolOutput::ok(stats),
            Err(e) => ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string()),
        }
    }
}

struct CleanupStorage {
    files: Arc<FileStore>,
}

#[async_trait]
impl Tool for CleanupStorage {
    fn name(&self) -> &str {
        "cleanup_storage"
    }

    fn description(&self) -> &str {
        "Remove old cached files. Defaults: drop files older than 30 days, then trim \
         oldest-first until the cache is under 500MB."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_age_hours": {
                    "type": "integer",
                    "description": "Maximum file age in hours (default 720)",
                    "default": DEFAULT_MAX_AGE_HOURS
                },
                "max_total_size_mb": {
                    "type": "integer",
                    "description": "Total size budget in MB (default 500)",
                    "default": DEFAULT_MAX_TOTAL_MB
                }
            }
        })
    }

    async fn execute(&self, args: Value, _session_id: &str) -> ToolOutput {
        let max_age_hours = args
            .get("max_age_hours")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_AGE_HOURS);
        let max_total_mb = args
            .get("max_total_size_mb")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_TOTAL_MB);

        match self.files.cleanup(
            Duration::from_secs(max_age_hours * 3600),
            max_total_mb * 1024 * 1024,
        ) {
            Ok(report) => match serde_json::to_value(report) {
                Ok(data) => ToolOutput::ok(data),
                Err(e) => ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string()),
            },
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
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;

    fn manager() -> (tempfile::TempDir, Arc<FileStore>, ToolManager) {
        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(FileStore::new(dir.path().join("cache")));
        let mut manager = ToolManager::new();
        register(&mut manager, Arc::clone(&files));
        (dir, files, manager)
    }

    #[tokio::test]
    async fn save_cached_file_copies_bytes() {
        let (dir, files, manager) = manager();
        let fid = files
            .cache_base64(&BASE64.encode("hello"), "text", Value::Null)
            .unwrap();
        let target = dir.path().join("out.txt");

        let out = manager
            .execute_tool(
                "save_cached_file",
                json!({"file_id": fid, "target_path": target.to_string_lossy()}),
                "s",
            )
            .await;
        assert!(!out.error);
        assert_eq!(std::fs::read_to_string(target).unwrap(), "hello");
    }

    #[tokio::test]
    async fn save_unknown_file_fails() {
        let (dir, _files, manager) = manager();
        let out = manager
            .execute_tool(
                "save_cached_file",
                json!({
                    "file_id": "ghost",
                    "target_path": dir.path().join("x").to_string_lossy()
                }),
                "s",
            )
            .await;
        assert!(out.error);
    }

    #[tokio::test]
    async fn stats_and_list_reflect_cache() {
        let (_dir, files, manager) = manager();
        files
            .cache_base64(&BASE64.encode("abc"), "text", Value::Null)
            .unwrap();

        let listed = manager
            .execute_tool("list_cached_files", json!({}), "s")
            .await;
        assert_eq!(listed.data.unwrap()["count"], 1);

        let stats = manager.execute_tool("storage_stats", json!({}), "s").await;
        assert_eq!(stats.data.unwrap()["file_count"], 1);
    }

    #[tokio::test]
    async fn cleanup_reports_removals() {
        let (_dir, files, manager) = manager();
        for _ in 0..3 {
            files
                .cache_base64(&BASE64.encode([1u8; 1000]), "text", Value::Null)
                .unwrap();
        }

        let out = manager
            .execute_tool(
                "cleanup_storage",
                json!({"max_age_hours": 1, "max_total_size_mb": 0}),
                "s",
            )
            .await;
        assert!(!out.error);
        assert_eq!(out.data.unwrap()["removed"], 3);
    }
}
