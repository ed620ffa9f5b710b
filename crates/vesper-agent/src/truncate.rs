//! Large tool-result truncation.
//!
//! Oversized tool results would blow up the context; this pass keeps them
//! logically referenceable instead. Base64-ish blobs (`screenshot`, `pdf`)
//! are handed to the [`FileStore`] and replaced by a short prefix plus a
//! `file_id`; long `text` payloads are cut with an annotation; anything else
//! oversized is truncated in serialised form.

use serde_json::{Map, Value, json};

use vesper_store::FileStore;

/// Env knob for the truncation threshold, bytes.
const MAX_SIZE_ENV: &str = "TOOL_RESULT_MAX_SIZE";

/// Default truncation threshold, bytes.
const DEFAULT_MAX_SIZE: usize = 10_240;

/// Blob fields replaced by cached references.
const BLOB_FIELDS: &[&str] = &["screenshot", "pdf"];

/// Minimum length before a blob field is worth caching.
const BLOB_MIN_CHARS: usize = 1000;

/// How much of a cached blob stays inline as a preview.
const BLOB_PREVIEW_CHARS: usize = 100;

/// The configured threshold.
pub fn max_result_size() -> usize {
    std::env::var(MAX_SIZE_ENV)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_SIZE)
}

/// Cut `s` at the given byte budget without splitting a UTF-8 character.
pub fn truncate_at_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

/// First `max_chars` characters of `s`.
pub fn char_prefix(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Apply the truncation policy to one serialised tool result.
///
/// Returns the (possibly) rewritten body. Blobs removed from the body stay
/// retrievable through the `file_id` recorded next to them.
pub fn truncate_tool_result(content: &str, files: &FileStore) -> String {
    let max_size = max_result_size();
    if content.len() <= max_size {
        return content.to_string();
    }

    let Ok(mut value) = serde_json::from_str::<Value>(content) else {
        // Not JSON: plain text cut with an annotation.
        let kept = truncate_at_boundary(content, max_size);
        let dropped = content.len() - kept.len();
        return format!("{kept}\n\n[... truncated {dropped} of {} bytes]", content.len());
    };

    let mut rewrote = false;
    if let Some(data) = value.get_mut("data").and_then(|d| d.as_object_mut()) {
        rewrote = rewrite_data(data, files, max_size);
    }

    if rewrote {
        return serde_json::to_string(&value).unwrap_or_else(|_| content.to_string());
    }

    // JSON with no recognised shape: truncate the serialised form.
    let kept = truncate_at_boundary(content, max_size);
    format!("{kept}\n\n[... JSON too large, truncated]")
}

fn rewrite_data(data: &mut Map<String, Value>, files: &FileStore, max_size: usize) -> bool {
    let mut rewrote = false;

    for &field in BLOB_FIELDS {
        let Some(blob) = data.get(field).and_then(|v| v.as_str()) else {
            continue;
        };
        if blob.chars().count() <= BLOB_MIN_CHARS {
            continue;
        }

        let original_size = blob.chars().count();
        let metadata = json!({
            "format": data.get("format").cloned().unwrap_or(Value::Null),
            "url": data.get("url").cloned().unwrap_or(Value::Null),
            "original_size": original_size,
        });

        match files.cache_base64(blob, field, metadata) {
            Ok(file_id) => {
                let preview = char_prefix(blob, BLOB_PREVIEW_CHARS);
                data.insert(field.to_string(), json!(format!("{preview}…[cached]")));
                data.insert(
                    format!("{field}_size"),
                    json!(format!(
                        "{original_size} chars (~{}KB)",
                        original_size / 1024
                    )),
                );
                data.insert(format!("{field}_file_id"), json!(file_id));
                data.insert(format!("{field}_truncated"), json!(true));
                data.insert(
                    "_summary".to_string(),
                    json!(format!(
                        "{field} generated and cached (file_id: {file_id}); use save_cached_file to keep it locally"
                    )),
                );
                rewrote = true;
            }
            Err(e) => {
                tracing::warn!(field, error = %e, "failed to cache blob, truncating inline");
                let preview = char_prefix(blob, BLOB_PREVIEW_CHARS);
                data.insert(field.to_string(), json!(format!("{preview}…[dropped]")));
                data.insert(format!("{field}_truncated"), json!(true));
                rewrote = true;
            }
        }
    }

    if let Some(text) = data.get("text").and_then(|v| v.as_str()) {
        if text.len() > max_size {
            let original_size = text.chars().count();
            let kept = truncate_at_boundary(text, max_size).to_string();
            let dropped = original_size - kept.chars().count();
            data.insert(
                "text".to_string(),
                json!(format!("{kept}\n\n...[text too long, {dropped} chars dropped]")),
            );
            data.insert("text_size".to_string(), json!(format!("{original_size} chars")));
            data.insert("text_truncated".to_string(), json!(true));
            rewrote = true;
        }
    }

    rewrote
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serial_test::serial;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path());
        (dir, files)
    }

    #[test]
    #[serial]
    fn small_results_pass_unchanged() {
        let (_dir, files) = store();
        let body = r#"{"error":false,"data":{"x":1}}"#;
        assert_eq!(truncate_tool_result(body, &files), body);
    }

    #[test]
    #[serial]
    fn non_json_is_cut_with_annotation() {
        let (_dir, files) = store();
        let body = "y".repeat(DEFAULT_MAX_SIZE + 500);
        let out = truncate_tool_result(&body, &files);
        assert!(out.len() < body.len());
        assert!(out.contains("[... truncated"));
    }

    #[test]
    #[serial]
    fn large_screenshot_is_cached_and_replaced() {
        let (_dir, files) = store();
        let blob = BASE64.encode(vec![7u8; 200_000]);
        let body = serde_json::to_string(&json!({
            "error": false,
            "data": {"screenshot": blob, "format": "png"}
        }))
        .unwrap();

        let out = truncate_tool_result(&body, &files);
        let value: Value = serde_json::from_str(&out).unwrap();
        let data = &value["data"];

        assert_eq!(data["screenshot_truncated"], true);
        let fid = data["screenshot_file_id"].as_str().unwrap();
        let replaced = data["screenshot"].as_str().unwrap();
        assert!(replaced.len() <= 120);
        assert!(replaced.ends_with("[cached]"));
        assert!(data["_summary"].as_str().unwrap().contains(fid));

        // The blob is retrievable through the reported file id.
        let bytes = files.get_bytes(fid).unwrap();
        assert_eq!(bytes, vec![7u8; 200_000]);

        // The rewritten body fits the budget plus constant overhead.
        assert!(out.len() <= max_result_size() + 1024);
    }

    #[test]
    #[serial]
    fn long_text_field_is_annotated() {
        let (_dir, files) = store();
        let body = serde_json::to_string(&json!({
            "error": false,
            "data": {"text": "z".repeat(DEFAULT_MAX_SIZE * 2)}
        }))
        .unwrap();

        let out = truncate_tool_result(&body, &files);
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["data"]["text_truncated"], true);
        assert!(value["data"]["text"].as_str().unwrap().contains("text too long"));
    }

    #[test]
    #[serial]
    fn unrecognised_large_json_is_cut() {
        let (_dir, files) = store();
        let body = serde_json::to_string(&json!({
            "error": false,
            "payload": "q".repeat(DEFAULT_MAX_SIZE * 2)
        }))
        .unwrap();

        let out = truncate_tool_result(&body, &files);
        assert!(out.len() < body.len());
        assert!(out.contains("[... JSON too large, truncated]"));
    }

    #[test]
    fn boundary_cut_respects_utf8() {
        let s = "好".repeat(100); // 3 bytes each
        let cut = truncate_at_boundary(&s, 10);
        assert_eq!(cut.len(), 9);
        assert_eq!(cut.chars().count(), 3);
    }
}
