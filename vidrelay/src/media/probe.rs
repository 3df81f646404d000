//! Media probing through ffprobe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{output_with_timeout, tokio_command};
use serde::Deserialize;
use tracing::debug;

/// Facts reported about a probed file.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbeReport {
    pub has_video_stream: bool,
    pub duration_seconds: f64,
    pub container_recognized: bool,
}

/// Why a probe could not produce a report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProbeError(pub String);

/// Inspects a local file and reports basic stream facts.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite())
}

/// Map raw `ffprobe -print_format json` output into a [`ProbeReport`].
pub fn parse_ffprobe_json(raw: &[u8]) -> Result<ProbeReport, ProbeError> {
    let output: FfprobeOutput = serde_json::from_slice(raw)
        .map_err(|e| ProbeError(format!("Unreadable ffprobe output: {e}")))?;

    let has_video_stream = output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("video"));

    let format_duration = output
        .format
        .as_ref()
        .and_then(|f| parse_seconds(f.duration.as_deref()));

    // Some containers only carry per-stream durations.
    let duration_seconds = format_duration
        .or_else(|| {
            output
                .streams
                .iter()
                .filter_map(|s| parse_seconds(s.duration.as_deref()))
                .reduce(f64::max)
        })
        .unwrap_or(0.0);

    let container_recognized = output
        .format
        .as_ref()
        .and_then(|f| f.format_name.as_deref())
        .is_some_and(|name| !name.trim().is_empty());

    Ok(ProbeReport {
        has_video_stream,
        duration_seconds,
        container_recognized,
    })
}

/// [`MediaProbe`] backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: PathBuf,
    timeout: Duration,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError> {
        let mut cmd = tokio_command(&self.binary);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path);

        let output = output_with_timeout(&mut cmd, self.timeout)
            .await
            .map_err(|e| ProbeError(format!("Failed to run ffprobe: {e}")))?;

        if output.timed_out() {
            return Err(ProbeError(format!(
                "ffprobe timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if !output.success() {
            return Err(ProbeError(format!(
                "ffprobe exited with {:?}: {}",
                output.code(),
                output.stderr_lossy().trim()
            )));
        }

        let report = parse_ffprobe_json(&output.stdout)?;
        debug!(path = %path.display(), ?report, "Probed media file");
        Ok(report)
    }
}
