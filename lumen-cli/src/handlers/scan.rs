//! Directory scanning handler

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lumen_core::{MediaFile, ScanRequest, ScanSummary, TaskKind};
use lumen_runtime::{TaskContext, TaskError, TaskHandler};
use serde_json::{json, Value as JsonValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Files between two progress reports
const PROGRESS_EVERY: usize = 250;

/// Walks a directory tree and lists the media files it holds
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanHandler;

#[async_trait]
impl TaskHandler for ScanHandler {
    async fn handle(
        &self,
        _kind: TaskKind,
        payload: JsonValue,
        ctx: TaskContext,
    ) -> Result<JsonValue, TaskError> {
        let request: ScanRequest = serde_json::from_value(payload)?;
        let progress = ctx.progress().clone();
        let cancel = ctx.cancellation_token().clone();

        let summary = tokio::task::spawn_blocking(move || {
            scan_directory(&request, &cancel, |found| {
                progress.report(json!({ "filesFound": found }))
            })
        })
        .await
        .map_err(|e| TaskError::failed(format!("Scan task aborted: {}", e)))??;

        Ok(serde_json::to_value(summary)?)
    }

    fn supports(&self, kind: TaskKind) -> bool {
        kind == TaskKind::ScanDirectory
    }
}

/// Walk `request.path`, calling `on_progress` every few hundred files
///
/// Unreadable entries and files rejected by the extension filter are
/// counted as skipped. Symlinks are not followed.
pub fn scan_directory(
    request: &ScanRequest,
    cancel: &CancellationToken,
    on_progress: impl Fn(usize),
) -> Result<ScanSummary, TaskError> {
    if !request.path.is_dir() {
        return Err(TaskError::failed(format!(
            "Not a directory: {}",
            request.path.display()
        )));
    }

    let mut walker = WalkDir::new(&request.path)
        .follow_links(false)
        .sort_by_file_name();
    if !request.recursive {
        walker = walker.max_depth(1);
    }

    let mut summary = ScanSummary::default();
    for entry in walker {
        if cancel.is_cancelled() {
            debug!(path = %request.path.display(), "Scan cancelled");
            return Err(TaskError::Cancelled);
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                summary.skipped += 1;
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            summary.directories_visited += 1;
            continue;
        }
        if !file_type.is_file() || !request.accepts(entry.path()) {
            summary.skipped += 1;
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping file without metadata");
                summary.skipped += 1;
                continue;
            }
        };

        summary.files.push(MediaFile {
            size_bytes: metadata.len(),
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            path: entry.into_path(),
        });
        if summary.files.len() % PROGRESS_EVERY == 0 {
            on_progress(summary.files.len());
        }
    }

    debug!(
        path = %request.path.display(),
        files = summary.files.len(),
        skipped = summary.skipped,
        "Scan finished"
    );
    Ok(summary)
}
