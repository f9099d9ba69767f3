//! Metadata and thumbnail handlers backed by ffprobe / ffmpeg

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lumen_core::{
    MediaMetadata, MetadataRequest, TaskKind, ThumbnailRequest, ThumbnailResult,
};
use lumen_runtime::{TaskContext, TaskError, TaskHandler};
use serde_json::{json, Value as JsonValue};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Stream details read from ffprobe's JSON report
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProbeInfo {
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
}

impl ProbeInfo {
    fn apply(self, metadata: &mut MediaMetadata) {
        metadata.duration_secs = self.duration_secs;
        metadata.width = self.width;
        metadata.height = self.height;
        metadata.codec = self.codec;
    }
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output
///
/// The first video stream provides dimensions and codec; audio-only files
/// report the first audio codec.
pub fn parse_probe_output(output: &str) -> Result<ProbeInfo, TaskError> {
    let report: JsonValue = serde_json::from_str(output)
        .map_err(|e| TaskError::failed(format!("Failed to parse ffprobe output: {}", e)))?;

    let duration_secs = report
        .pointer("/format/duration")
        .and_then(|d| d.as_str())
        .and_then(|d| d.parse::<f64>().ok());

    let streams = report
        .get("streams")
        .and_then(|s| s.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let of_type = |codec_type: &str| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some(codec_type))
    };
    let codec_name = |stream: &JsonValue| {
        stream
            .get("codec_name")
            .and_then(|c| c.as_str())
            .map(str::to_string)
    };
    let dimension = |stream: &JsonValue, key: &str| {
        stream
            .get(key)
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
    };

    let info = match (of_type("video"), of_type("audio")) {
        (Some(video), _) => ProbeInfo {
            duration_secs,
            width: dimension(video, "width"),
            height: dimension(video, "height"),
            codec: codec_name(video),
        },
        (None, Some(audio)) => ProbeInfo {
            duration_secs,
            codec: codec_name(audio),
            ..ProbeInfo::default()
        },
        (None, None) => ProbeInfo {
            duration_secs,
            ..ProbeInfo::default()
        },
    };
    Ok(info)
}

/// Run ffprobe on `path`; `Ok(None)` when the binary is not installed
async fn probe(ffprobe: &Path, path: &Path) -> Result<Option<ProbeInfo>, TaskError> {
    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TaskError::failed(format!("Failed to run ffprobe: {}", e))),
    };

    if !output.status.success() {
        return Err(TaskError::with_details(
            "ffprobe failed",
            json!({ "stderr": String::from_utf8_lossy(&output.stderr) }),
        ));
    }
    parse_probe_output(&String::from_utf8_lossy(&output.stdout)).map(Some)
}

/// File system facts plus, when ffprobe is available, stream details
#[derive(Debug, Clone)]
pub struct MetadataHandler {
    ffprobe: PathBuf,
}

impl MetadataHandler {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }
}

impl Default for MetadataHandler {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl TaskHandler for MetadataHandler {
    async fn handle(
        &self,
        _kind: TaskKind,
        payload: JsonValue,
        ctx: TaskContext,
    ) -> Result<JsonValue, TaskError> {
        let request: MetadataRequest = serde_json::from_value(payload)?;
        let path = request.path;

        let file = tokio::fs::metadata(&path)
            .await
            .map_err(|e| TaskError::failed(format!("Cannot read {}: {}", path.display(), e)))?;
        if !file.is_file() {
            return Err(TaskError::failed(format!("Not a file: {}", path.display())));
        }

        let mut metadata = MediaMetadata {
            size_bytes: file.len(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase()),
            modified_at: file.modified().ok().map(DateTime::<Utc>::from),
            path,
            ..MediaMetadata::default()
        };

        ctx.check_cancelled()?;
        match probe(&self.ffprobe, &metadata.path).await {
            Ok(Some(info)) => info.apply(&mut metadata),
            Ok(None) => debug!("ffprobe not installed, reporting file metadata only"),
            Err(e) => warn!(
                path = %metadata.path.display(),
                error = %e,
                "Probe failed, reporting file metadata only"
            ),
        }

        Ok(serde_json::to_value(metadata)?)
    }

    fn supports(&self, kind: TaskKind) -> bool {
        kind == TaskKind::ExtractMetadata
    }
}

/// Extracts one frame with ffmpeg
#[derive(Debug, Clone)]
pub struct ThumbnailHandler {
    ffmpeg: PathBuf,
}

impl ThumbnailHandler {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl Default for ThumbnailHandler {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// ffmpeg arguments grabbing the frame at `request.timestamp_secs`
pub fn thumbnail_args(request: &ThumbnailRequest) -> Vec<String> {
    let mut args = vec![
        "-ss".to_string(),
        format!("{:.3}", request.timestamp_secs),
        "-i".to_string(),
        request.video_path.to_string_lossy().into_owned(),
        "-frames:v".to_string(),
        "1".to_string(),
    ];
    if let Some(width) = request.width {
        args.push("-vf".to_string());
        args.push(format!("scale={}:-2", width));
    }
    args.extend([
        "-q:v".to_string(),
        "5".to_string(),
        "-y".to_string(),
        request.output_path.to_string_lossy().into_owned(),
    ]);
    args
}

#[async_trait]
impl TaskHandler for ThumbnailHandler {
    async fn handle(
        &self,
        _kind: TaskKind,
        payload: JsonValue,
        ctx: TaskContext,
    ) -> Result<JsonValue, TaskError> {
        let request: ThumbnailRequest = serde_json::from_value(payload)?;
        if !request.video_path.is_file() {
            return Err(TaskError::failed(format!(
                "Input file does not exist: {}",
                request.video_path.display()
            )));
        }
        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        ctx.report_progress(json!({ "stage": "extracting" }));
        let run = Command::new(&self.ffmpeg)
            .args(thumbnail_args(&request))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        // Dropping the future kills ffmpeg
        let output = tokio::select! {
            output = run => output,
            _ = ctx.cancelled() => return Err(TaskError::Cancelled),
        };
        let output = output.map_err(|e| {
            TaskError::failed(format!("Failed to run {}: {}", self.ffmpeg.display(), e))
        })?;

        if !output.status.success() {
            return Err(TaskError::with_details(
                "Thumbnail extraction failed",
                json!({
                    "status": output.status.code(),
                    "stderr": String::from_utf8_lossy(&output.stderr),
                }),
            ));
        }

        let size_bytes = tokio::fs::metadata(&request.output_path).await?.len();
        ctx.report_progress(json!({ "stage": "done" }));
        Ok(serde_json::to_value(ThumbnailResult {
            output_path: request.output_path,
            size_bytes,
        })?)
    }

    fn supports(&self, kind: TaskKind) -> bool {
        kind == TaskKind::GenerateThumbnail
    }
}
