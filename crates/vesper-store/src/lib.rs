//! Durable per-session state for the Vesper runtime.
//!
//! Four small file-backed stores with no cross-session contention:
//!
//! - [`TodoStore`]: one JSON document of planner items per session.
//! - [`ReportStore`]: append-only sub-agent reports as dated markdown files.
//! - [`FileStore`]: content-addressed blob cache with a line-log index.
//! - [`LtmStore`]: append-only markdown of distilled long-term preferences.
//!
//! All writes are whole-file (write-then-rename where atomicity matters);
//! readers always see the last committed snapshot.

pub mod error;
pub mod file;
pub mod ltm;
pub mod report;
pub mod todo;

pub use error::{Result, StoreError};
pub use file::{CachedFileInfo, CleanupReport, FileStore, ImageData, StorageStats};
pub use ltm::LtmStore;
pub use report::{ReportEntry, ReportFields, ReportStore, TodoProgress};
pub use todo::TodoStore;

/// Current time as fractional seconds since the epoch.
pub(crate) fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Write `contents` to `path` atomically via a temp file and rename.
pub(crate) fn write_atomic(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}
