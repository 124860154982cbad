//! Media probing: extract duration and geometry without a full decode

use async_trait::async_trait;
use log::debug;
use std::path::Path;
use tokio::process::Command;

use crate::error::ProbeError;
use crate::models::ProbeData;

/// Capability to extract duration and track geometry from a video file
///
/// Injected into the scan coordinator so tests can substitute canned
/// outcomes. Implementations must be fully async and never block the
/// caller's thread.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Probe a single file
    ///
    /// `Unsupported` failures are permanent (cached as a negative entry);
    /// `Io` failures are transient and retried on the next request.
    async fn probe(&self, path: &Path) -> Result<ProbeData, ProbeError>;
}

/// Production prober shelling out to ffprobe with JSON output
///
/// No timeout of its own; relies on ffprobe's internal limits.
pub struct FfprobeProber {
    binary: String,
}

impl FfprobeProber {
    /// Use `ffprobe` from PATH
    pub fn new() -> Self {
        Self::with_binary("ffprobe")
    }

    /// Use a specific ffprobe binary
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<ProbeData, ProbeError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| ProbeError::Unsupported("invalid path encoding".to_string()))?;

        debug!("probing {path_str}");
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
                path_str,
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProbeError::Unsupported(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }

        let raw = std::str::from_utf8(&output.stdout)
            .map_err(|_| ProbeError::Unsupported("non-UTF8 ffprobe output".to_string()))?;
        parse_ffprobe_output(raw)
    }
}

/// Parse ffprobe's `-print_format json` output into probe data
///
/// Applies the embedded orientation transform (rotation side data or the
/// legacy rotate tag) so width/height reflect display geometry. Duration
/// must be finite and positive or the file counts as unsupported.
fn parse_ffprobe_output(raw: &str) -> Result<ProbeData, ProbeError> {
    let json: serde_json::Value = serde_json::from_str(raw)
        .map_err(|_| ProbeError::Unsupported("unparseable ffprobe JSON".to_string()))?;

    let streams = json["streams"]
        .as_array()
        .ok_or_else(|| ProbeError::Unsupported("no streams reported".to_string()))?;
    let video = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or_else(|| ProbeError::Unsupported("no video stream".to_string()))?;

    let width = video["width"].as_u64().unwrap_or(0) as u32;
    let height = video["height"].as_u64().unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(ProbeError::Unsupported("missing video geometry".to_string()));
    }

    let duration = video["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            json["format"]["duration"]
                .as_str()
                .and_then(|d| d.parse::<f64>().ok())
        })
        .unwrap_or(0.0);
    if !duration.is_finite() || duration <= 0.0 {
        return Err(ProbeError::Unsupported(format!(
            "invalid duration {duration}"
        )));
    }

    let (width, height) = if rotation_of(video).rem_euclid(180) == 90 {
        (height, width)
    } else {
        (width, height)
    };

    Ok(ProbeData {
        width,
        height,
        duration,
    })
}

/// Rotation in degrees, normalized to [0, 360)
fn rotation_of(stream: &serde_json::Value) -> i64 {
    let raw = stream["side_data_list"]
        .as_array()
        .and_then(|list| list.iter().find_map(|sd| sd["rotation"].as_i64()))
        .or_else(|| {
            stream["tags"]["rotate"]
                .as_str()
                .and_then(|r| r.parse::<i64>().ok())
        })
        .unwrap_or(0);
    raw.rem_euclid(360)
}
