//! Typed payloads and results for the media-library operations
//!
//! Tasks carry their payload as opaque JSON so the queue and the pools stay
//! agnostic of what a worker does. These types are the shapes the managers
//! encode on the way in and decode on the way out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::PathBuf;

use crate::error::Result;
use crate::task::TaskKind;

/// Request to walk a directory for media files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub path: PathBuf,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Lower-case file extensions without the dot; empty means any
    #[serde(default)]
    pub extensions: Vec<String>,
}

fn default_recursive() -> bool {
    true
}

impl ScanRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: true,
            extensions: Vec::new(),
        }
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn non_recursive(mut self) -> Self {
        self.recursive = false;
        self
    }

    /// Whether a file name passes the extension filter
    pub fn accepts(&self, path: &std::path::Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions.iter().any(|x| *x == e)
            })
            .unwrap_or(false)
    }
}

/// A media file discovered by a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Result of a directory scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub files: Vec<MediaFile>,
    pub directories_visited: u64,
    pub skipped: u64,
}

impl ScanSummary {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// Request to extract a still frame from a video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailRequest {
    pub video_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub timestamp_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

impl ThumbnailRequest {
    pub fn new(video_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            video_path: video_path.into(),
            output_path: output_path.into(),
            timestamp_secs: 0.0,
            width: None,
        }
    }

    pub fn at(mut self, timestamp_secs: f64) -> Self {
        self.timestamp_secs = timestamp_secs.max(0.0);
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailResult {
    pub output_path: PathBuf,
    pub size_bytes: u64,
}

/// Request to probe a media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRequest {
    pub path: PathBuf,
}

impl MetadataRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Technical metadata of a media file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub path: PathBuf,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

/// Binds a request type to the task kind that carries it
pub trait TaskPayload: Serialize {
    const KIND: TaskKind;

    fn to_payload(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

impl TaskPayload for ScanRequest {
    const KIND: TaskKind = TaskKind::ScanDirectory;
}

impl TaskPayload for ThumbnailRequest {
    const KIND: TaskKind = TaskKind::GenerateThumbnail;
}

impl TaskPayload for MetadataRequest {
    const KIND: TaskKind = TaskKind::ExtractMetadata;
}
