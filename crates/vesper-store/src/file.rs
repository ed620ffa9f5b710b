//! Content-addressed blob cache.
//!
//! Tool results routinely carry large base64 payloads (screenshots, PDFs,
//! long text). The cache stores the decoded bytes under an opaque `file_id`,
//! keeps a sidecar of metadata, and appends every entry to a line-oriented
//! index `<fid>\t<path>` so readers tolerate concurrent appends. The agent
//! only ever passes `file_id`s through its context.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Index file name inside the store root.
const INDEX_FILE: &str = "index.log";

/// Image extensions recognised by [`FileStore::is_image_file`].
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    kind: String,
    created_at: f64,
    size: u64,
    #[serde(default)]
    metadata: Value,
}

/// Listing entry for a cached file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFileInfo {
    /// The file id.
    pub file_id: String,
    /// Kind tag the blob was cached with.
    pub kind: String,
    /// Size in bytes.
    pub size: u64,
    /// Creation time, seconds since the epoch.
    pub created_at: f64,
    /// Path on disk.
    pub path: String,
}

/// Aggregate storage statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    /// Number of cached files.
    pub file_count: usize,
    /// Total bytes on disk.
    pub total_bytes: u64,
    /// Per-kind file counts.
    pub by_kind: HashMap<String, usize>,
}

/// Result of a cleanup pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Files removed.
    pub removed: usize,
    /// Bytes reclaimed.
    pub freed_bytes: u64,
}

/// An image payload ready for a multimodal message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    /// Self-contained data URL.
    pub url: String,
    /// The detected MIME type.
    pub mime_type: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Content-addressed blob cache with an append-only index.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn append_index(&self, fid: &str, path: &Path) -> Result<()> {
        use std::io::Write;
        let _held = self.index_lock.lock().unwrap();
        std::fs::create_dir_all(&self.root)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.index_path())?;
        writeln!(file, "{fid}\t{}", path.display())?;
        Ok(())
    }

    fn load_index(&self) -> HashMap<String, PathBuf> {
        let Ok(raw) = std::fs::read_to_string(self.index_path()) else {
            return HashMap::new();
        };
        let mut map = HashMap::new();
        for line in raw.lines() {
            if let Some((fid, path)) = line.split_once('\t') {
                map.insert(fid.to_string(), PathBuf::from(path));
            }
        }
        map
    }

    /// Cache a base64 payload under a fresh file id.
    pub fn cache_base64(&self, data: &str, kind: &str, metadata: Value) -> Result<String> {
        let bytes = BASE64
            .decode(data.trim())
            .map_err(|e| StoreError::Decode(format!("invalid base64 payload: {e}")))?;

        let fid = Uuid::new_v4().simple().to_string();
        let ext = extension_for_kind(kind);
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join(format!("{fid}.{ext}"));
        std::fs::write(&path, &bytes)?;

        let sidecar = Sidecar {
            kind: kind.to_string(),
            created_at: crate::now_ts(),
            size: bytes.len() as u64,
            metadata,
        };
        std::fs::write(
            self.root.join(format!("{fid}.meta.json")),
            serde_json::to_string_pretty(&sidecar)?,
        )?;

        self.append_index(&fid, &path)?;
        tracing::debug!(%fid, kind, size = bytes.len(), "cached blob");
        Ok(fid)
    }

    /// Store an uploaded file, preserving its extension.
    pub fn save_upload(&self, filename: &str, content: &[u8]) -> Result<String> {
        let fid = Uuid::new_v4().simple().to_string();
        let ext = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bin".to_string());
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join(format!("{fid}.{ext}"));
        std::fs::write(&path, content)?;

        let sidecar = Sidecar {
            kind: "upload".to_string(),
            created_at: crate::now_ts(),
            size: content.len() as u64,
            metadata: serde_json::json!({ "filename": filename }),
        };
        std::fs::write(
            self.root.join(format!("{fid}.meta.json")),
            serde_json::to_string_pretty(&sidecar)?,
        )?;

        self.append_index(&fid, &path)?;
        Ok(fid)
    }

    /// Path of a cached file, if it still exists.
    pub fn get_path(&self, fid: &str) -> Option<PathBuf> {
        self.load_index()
            .remove(fid)
            .filter(|path| path.exists())
    }

    /// Raw bytes of a cached file.
    pub fn get_bytes(&self, fid: &str) -> Option<Vec<u8>> {
        std::fs::read(self.get_path(fid)?).ok()
    }

    /// Cached file content as UTF-8 text.
    pub fn get_text(&self, fid: &str) -> Option<String> {
        String::from_utf8(self.get_bytes(fid)?).ok()
    }

    /// Whether a path looks like an image by extension.
    pub fn is_image_file(path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
    }

    /// A cached image as a self-contained data URL.
    pub fn get_image_data_url(&self, fid: &str) -> Option<ImageData> {
        let path = self.get_path(fid)?;
        if !Self::is_image_file(&path) {
            return None;
        }
        let bytes = std::fs::read(&path).ok()?;
        let mime_type = mime_for_path(&path);
        Some(ImageData {
            url: format!("data:{mime_type};base64,{}", BASE64.encode(&bytes)),
            mime_type,
        })
    }

    /// List all cached files, newest first.
    pub fn list(&self) -> Vec<CachedFileInfo> {
        let mut infos: Vec<CachedFileInfo> = self
            .load_index()
            .into_iter()
            .filter_map(|(fid, path)| {
                let size = path.metadata().ok()?.len();
                let sidecar: Option<Sidecar> = std::fs::read_to_string(
                    self.root.join(format!("{fid}.meta.json")),
                )
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok());
                let (kind, created_at) = sidecar
                    .map(|s| (s.kind, s.created_at))
                    .unwrap_or_else(|| ("unknown".to_string(), 0.0));
                Some(CachedFileInfo {
                    file_id: fid,
                    kind,
                    size,
                    created_at,
                    path: path.to_string_lossy().into_owned(),
                })
            })
            .collect();
        infos.sort_by(|a, b| b.created_at.total_cmp(&a.created_at));
        infos
    }

    /// Aggregate statistics over the cache.
    pub fn stats(&self) -> StorageStats {
        let files = self.list();
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut total_bytes = 0;
        for file in &files {
            *by_kind.entry(file.kind.clone()).or_default() += 1;
            total_bytes += file.size;
        }
        StorageStats {
            file_count: files.len(),
            total_bytes,
            by_kind,
        }
    }

    /// Remove files older than `max_age`, then keep removing oldest files
    /// until the total size drops under `max_total_bytes`.
    pub fn cleanup(&self, max_age: Duration, max_total_bytes: u64) -> Result<CleanupReport> {
        let mut files = self.list();
        // Oldest last in the list; walk from the back.
        let cutoff = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64() - max_age.as_secs_f64())
            .unwrap_or(0.0);

        let mut removed = 0;
        let mut freed_bytes = 0;

        files.retain(|file| {
            if file.created_at < cutoff {
                if self.remove_entry(file).is_ok() {
                    removed += 1;
                    freed_bytes += file.size;
                }
                false
            } else {
                true
            }
        });

        let mut total: u64 = files.iter().map(|f| f.size).sum();
        while total > max_total_bytes {
            let Some(oldest) = files.pop() else { break };
            if self.remove_entry(&oldest).is_ok() {
                removed += 1;
                freed_bytes += oldest.size;
                total -= oldest.size;
            }
        }

        tracing::info!(removed, freed_bytes, "storage cleanup finished");
        Ok(CleanupReport {
            removed,
            freed_bytes,
        })
    }

    fn remove_entry(&self, file: &CachedFileInfo) -> Result<()> {
        std::fs::remove_file(&file.path)?;
        let _ = std::fs::remove_file(self.root.join(format!("{}.meta.json", file.file_id)));
        Ok(())
    }
}

fn extension_for_kind(kind: &str) -> &'static str {
    match kind {
        "screenshot" | "image" => "png",
        "pdf" => "pdf",
        "text" => "txt",
        _ => "bin",
    }
}

fn mime_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
    .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn cache_and_fetch_roundtrip() {
        let (_dir, store) = store();
        let payload = BASE64.encode(b"pretend this is a png");
        let fid = store
            .cache_base64(&payload, "screenshot", json!({"url": "http://x"}))
            .unwrap();

        let bytes = store.get_bytes(&fid).unwrap();
        assert_eq!(bytes, b"pretend this is a png");
        assert!(store.get_path(&fid).unwrap().to_string_lossy().ends_with(".png"));
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let (_dir, store) = store();
        let err = store.cache_base64("not-base64!!!", "text", Value::Null);
        assert!(matches!(err, Err(StoreError::Decode(_))));
    }

    #[test]
    fn unknown_fid_yields_none() {
        let (_dir, store) = store();
        assert!(store.get_path("ghost").is_none());
        assert!(store.get_bytes("ghost").is_none());
        assert!(store.get_text("ghost").is_none());
    }

    #[test]
    fn text_kind_roundtrips_as_utf8() {
        let (_dir, store) = store();
        let fid = store
            .cache_base64(&BASE64.encode("hello world"), "text", Value::Null)
            .unwrap();
        assert_eq!(store.get_text(&fid).unwrap(), "hello world");
    }

    #[test]
    fn image_data_url_includes_mime() {
        let (_dir, store) = store();
        let fid = store
            .cache_base64(&BASE64.encode(b"fake png bytes"), "screenshot", Value::Null)
            .unwrap();
        let image = store.get_image_data_url(&fid).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert!(image.url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn non_image_has_no_data_url() {
        let (_dir, store) = store();
        let fid = store
            .cache_base64(&BASE64.encode("plain"), "text", Value::Null)
            .unwrap();
        assert!(store.get_image_data_url(&fid).is_none());
    }

    #[test]
    fn upload_preserves_extension() {
        let (_dir, store) = store();
        let fid = store.save_upload("notes.md", b"# hi").unwrap();
        assert!(store.get_path(&fid).unwrap().to_string_lossy().ends_with(".md"));
    }

    #[test]
    fn stats_counts_by_kind() {
        let (_dir, store) = store();
        store
            .cache_base64(&BASE64.encode("a"), "text", Value::Null)
            .unwrap();
        store
            .cache_base64(&BASE64.encode("bb"), "text", Value::Null)
            .unwrap();
        store
            .cache_base64(&BASE64.encode("ccc"), "screenshot", Value::Null)
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.total_bytes, 6);
        assert_eq!(stats.by_kind.get("text"), Some(&2));
        assert_eq!(stats.by_kind.get("screenshot"), Some(&1));
    }

    #[test]
    fn cleanup_respects_size_budget() {
        let (_dir, store) = store();
        for _ in 0..4 {
            store
                .cache_base64(&BASE64.encode([0u8; 100]), "text", Value::Null)
                .unwrap();
        }

        let report = store
            .cleanup(Duration::from_secs(3600), 250)
            .unwrap();
        assert!(report.removed >= 2);
        assert!(store.stats().total_bytes <= 250);
    }

    #[test]
    fn is_image_file_by_extension() {
        assert!(FileStore::is_image_file(Path::new("shot.PNG")));
        assert!(FileStore::is_image_file(Path::new("photo.jpeg")));
        assert!(!FileStore::is_image_file(Path::new("doc.pdf")));
        assert!(!FileStore::is_image_file(Path::new("noext")));
    }
}
