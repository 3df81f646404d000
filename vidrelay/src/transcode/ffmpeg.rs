//! ffmpeg transcode engine.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use process_utils::{output_with_timeout, tokio_command};
use tracing::debug;

use super::engine::{EncodeError, EncodeRequest, TranscodeEngine};
use super::tier::TierParams;

/// Containers that benefit from moving the moov atom to the front.
fn wants_faststart(container: &str) -> bool {
    matches!(
        container.to_ascii_lowercase().as_str(),
        "mp4" | "mov" | "m4v"
    )
}

/// [`TranscodeEngine`] that shells out to ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    binary: PathBuf,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn common_prefix(input: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
        ]
    }

    fn common_suffix(params: &TierParams, output: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if wants_faststart(&params.container) {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }
        args.extend([
            "-avoid_negative_ts".to_string(),
            "make_zero".to_string(),
            output.to_string_lossy().into_owned(),
        ]);
        args
    }

    /// Arguments for a re-encode.
    pub fn build_encode_args(&self, input: &Path, params: &TierParams, output: &Path) -> Vec<String> {
        let mut args = Self::common_prefix(input);

        args.extend(["-c:v".to_string(), params.video_codec.encoder().to_string()]);
        if let Some(preset) = &params.preset {
            args.extend(["-preset".to_string(), preset.clone()]);
        }
        if let Some(crf) = params.crf {
            args.extend(["-crf".to_string(), crf.to_string()]);
        }
        if let Some((w, h)) = params.scale_dimensions() {
            args.extend([
                "-vf".to_string(),
                format!(
                    "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
                ),
            ]);
        }

        args.extend(["-c:a".to_string(), "aac".to_string()]);
        if let Some(bitrate) = &params.audio_bitrate {
            args.extend(["-b:a".to_string(), bitrate.clone()]);
        }
        args.extend(["-fflags".to_string(), "+genpts".to_string()]);

        args.extend(Self::common_suffix(params, output));
        args
    }

    /// Arguments for a stream copy.
    pub fn build_remux_args(&self, input: &Path, params: &TierParams, output: &Path) -> Vec<String> {
        let mut args = Self::common_prefix(input);
        args.extend(["-c".to_string(), "copy".to_string()]);
        args.extend(Self::common_suffix(params, output));
        args
    }

    async fn run(&self, args: Vec<String>, request: &EncodeRequest<'_>) -> Result<PathBuf, EncodeError> {
        debug!(tier = %request.params.tier, output = %request.output.display(), "Starting ffmpeg");

        let mut cmd = tokio_command(&self.binary);
        cmd.args(&args);

        let output = output_with_timeout(&mut cmd, request.timeout)
            .await
            .map_err(|e| EncodeError::new(format!("Failed to start ffmpeg: {e}")))?;

        if output.timed_out() {
            return Err(EncodeError::timeout(request.timeout));
        }
        if !output.success() {
            let stderr = output.stderr_lossy();
            let tail = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or("no diagnostic output");
            return Err(EncodeError::new(format!(
                "ffmpeg exited with code {:?}: {tail}",
                output.code()
            )));
        }

        Ok(request.output.to_path_buf())
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn encode(&self, request: &EncodeRequest<'_>) -> Result<PathBuf, EncodeError> {
        let args = self.build_encode_args(request.input, request.params, request.output);
        self.run(args, request).await
    }

    async fn remux(&self, request: &EncodeRequest<'_>) -> Result<PathBuf, EncodeError> {
        let args = self.build_remux_args(request.input, request.params, request.output);
        self.run(args, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::tier::default_tiers;
    use std::time::Duration;

    #[test]
    fn test_hevc_args() {
        let engine = FfmpegEngine::new("ffmpeg");
        let params = &default_tiers()[0];
        let args = engine.build_encode_args(Path::new("/in.webm"), params, Path::new("/out.mp4"));
        let joined = args.join(" ");

        assert!(joined.starts_with("-y -hide_banner"));
        assert!(joined.contains("-i /in.webm"));
        assert!(joined.contains("-c:v libx265 -preset medium -crf 28"));
        assert!(joined.contains("-c:a aac -b:a 128k"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.contains("-avoid_negative_ts make_zero"));
        assert!(!joined.contains("-vf"));
        assert_eq!(args.last().map(String::as_str), Some("/out.mp4"));
    }

    #[test]
    fn test_scale_filter() {
        let engine = FfmpegEngine::new("ffmpeg");
        let mut params = default_tiers()[1].clone();
        params.scale = Some("1280x720".to_string());
        let joined = engine
            .build_encode_args(Path::new("/in"), &params, Path::new("/out.mp4"))
            .join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains(
            "-vf scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2"
        ));
    }

    #[test]
    fn test_remux_args() {
        let engine = FfmpegEngine::new("ffmpeg");
        let mut params = default_tiers()[2].clone();
        let joined = engine
            .build_remux_args(Path::new("/in.mkv"), &params, Path::new("/out.mp4"))
            .join(" ");
        assert!(joined.contains("-c copy"));
        assert!(!joined.contains("-c:v"));
        assert!(joined.contains("+faststart"));

        params.container = "mkv".to_string();
        let joined = engine
            .build_remux_args(Path::new("/in.mkv"), &params, Path::new("/out.mkv"))
            .join(" ");
        assert!(!joined.contains("+faststart"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let engine = FfmpegEngine::new("no-such-ffmpeg-3b9d");
        let params = default_tiers().remove(2);
        let request = EncodeRequest {
            input: Path::new("/in.mkv"),
            output: Path::new("/tmp/out.mp4"),
            params: &params,
            timeout: Duration::from_secs(1),
        };
        let err = engine.remux(&request).await.unwrap_err();
        assert!(err.message.contains("Failed to start ffmpeg"));
    }
}
