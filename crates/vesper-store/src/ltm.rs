//! Long-term memory as append-only markdown.
//!
//! Distilled user preferences land in one markdown file as timestamped
//! `### [...]` sections. There is a single writer at a time and no
//! in-place editing; the whole file is loaded into the system prompt when
//! the feature is enabled.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::Result;

/// Env switch for loading/writing long-term memory.
const ENABLED_ENV: &str = "LTM_ENABLED";

/// Env override for the markdown path.
const PATH_ENV: &str = "LTM_PATH";

/// Default markdown location.
const DEFAULT_PATH: &str = "data/ltm.md";

/// Header written when the file is first created.
const FILE_HEADER: &str = "# Long-term memory\n\n";

/// Append-only markdown store of distilled long-term preferences.
#[derive(Debug, Clone)]
pub struct LtmStore {
    path: PathBuf,
}

impl LtmStore {
    /// Create a store at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at the env-configured path (`LTM_PATH`).
    pub fn from_env() -> Self {
        let path = std::env::var(PATH_ENV).unwrap_or_else(|_| DEFAULT_PATH.to_string());
        Self::new(path)
    }

    /// Whether long-term memory is enabled (`LTM_ENABLED`).
    pub fn enabled() -> bool {
        std::env::var(ENABLED_ENV)
            .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
            .unwrap_or(false)
    }

    /// The markdown path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped section.
    pub fn append_section(&self, title: &str, content: &str, tags: &[&str]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let is_new = !self.path.exists();

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if is_new {
            file.write_all(FILE_HEADER.as_bytes())?;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "### [{timestamp}] {title}\n")?;
        if !tags.is_empty() {
            writeln!(file, "- Tags: {}\n", tags.join(", "))?;
        }
        writeln!(file, "{}\n", content.trim())?;
        Ok(())
    }

    /// The entire markdown, empty when the file does not exist yet.
    pub fn read_all(&self) -> String {
        std::fs::read_to_string(&self.path).unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LtmStore::new(dir.path().join("ltm.md"));
        assert!(store.read_all().is_empty());
    }

    #[test]
    fn first_append_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = LtmStore::new(dir.path().join("ltm.md"));

        store
            .append_section("用户偏好总结", "- prefers concise answers", &["preference"])
            .unwrap();

        let content = store.read_all();
        assert!(content.starts_with(FILE_HEADER));
        assert!(content.contains("### ["));
        assert!(content.contains("用户偏好总结"));
        assert!(content.contains("- Tags: preference"));
        assert!(content.contains("- prefers concise answers"));
    }

    #[test]
    fn sections_accumulate_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = LtmStore::new(dir.path().join("ltm.md"));

        store.append_section("first", "one", &[]).unwrap();
        store.append_section("second", "two", &[]).unwrap();

        let content = store.read_all();
        let first = content.find("first").unwrap();
        let second = content.find("second").unwrap();
        assert!(first < second);
        assert_eq!(content.matches("### [").count(), 2);
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LtmStore::new(dir.path().join("nested/deep/ltm.md"));
        store.append_section("t", "c", &[]).unwrap();
        assert!(!store.read_all().is_empty());
    }
}
