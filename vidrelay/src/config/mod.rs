//! Application configuration.
//!
//! Settings come from built-in defaults, then an optional JSON file named by
//! `VIDRELAY_CONFIG`, then individual environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::acquisition::AcquisitionConfig;
use crate::api::server::ApiServerConfig;
use crate::media::ValidationConfig;
use crate::publish::PublishConfig;
use crate::transcode::TranscodeConfig;
use crate::utils::fs;
use crate::{Error, Result};

pub const CONFIG_PATH_ENV: &str = "VIDRELAY_CONFIG";

/// Filesystem layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Acquired (raw) files.
    pub work_dir: PathBuf,
    /// Transcoded files.
    pub converted_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Stored default cookie file.
    pub cookie_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::rooted_at("./data")
    }
}

impl PathsConfig {
    /// Standard layout under `root`.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            work_dir: root.join("downloads"),
            converted_dir: root.join("converted"),
            audit_dir: root.join("audit"),
            log_dir: root.join("logs"),
            cookie_file: root.join("cookies.txt"),
        }
    }
}

/// External tool locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ytdlp: String,
    pub ffmpeg: String,
    pub ffprobe: String,
    /// yt-dlp `--socket-timeout` in seconds.
    pub socket_timeout_secs: u64,
    pub referer: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            socket_timeout_secs: 30,
            referer: Some("https://www.youtube.com/".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ApiServerConfig,
    pub paths: PathsConfig,
    pub tools: ToolsConfig,
    pub acquisition: AcquisitionConfig,
    pub transcode: TranscodeConfig,
    pub validation: ValidationConfig,
    pub publish: PublishConfig,
}

impl AppConfig {
    /// Load from the optional JSON file and the process environment.
    pub async fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim())).await?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing sections take their defaults.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io_path("reading config file", path, e))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("invalid config file {}: {e}", path.display())))?;
        info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Blank values are ignored. An unparseable port is a configuration error.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(bind) = get("API_BIND_ADDRESS") {
            self.server.bind_address = bind;
        }
        if let Some(port) = get("API_PORT").or_else(|| get("PORT")) {
            self.server.port = port
                .parse()
                .map_err(|_| Error::config(format!("invalid port '{port}'")))?;
        }
        if let Some(url) = get("CLOUDINARY_URL") {
            self.publish.cloudinary_url = Some(url);
        }
        if let Some(bin) = get("YTDLP_PATH") {
            self.tools.ytdlp = bin;
        }
        if let Some(bin) = get("FFMPEG_PATH") {
            self.tools.ffmpeg = bin;
        }
        if let Some(bin) = get("FFPROBE_PATH") {
            self.tools.ffprobe = bin;
        }
        if let Some(root) = get("VIDRELAY_WORK_DIR") {
            self.paths = PathsConfig::rooted_at(root);
        }
        if let Some(order) = get("VIDRELAY_STRATEGIES") {
            let names: Vec<&str> = order
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            self.acquisition.reorder(&names)?;
            debug!(?names, "Strategy order overridden");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.bind_address.trim().is_empty() {
            return Err(Error::config("server bind address must not be empty"));
        }
        if self.tools.ytdlp.is_empty() || self.tools.ffmpeg.is_empty() || self.tools.ffprobe.is_empty() {
            return Err(Error::config("tool paths must not be empty"));
        }
        if self.validation.sniff_bytes == 0 || self.validation.probe_timeout_secs == 0 {
            return Err(Error::config("validation sniff length and probe timeout must be positive"));
        }
        if self.publish.max_upload_bytes == 0 || self.publish.request_timeout_secs == 0 {
            return Err(Error::config("publish limits must be positive"));
        }
        self.acquisition.validate()?;
        self.transcode.validate()
    }

    /// Create every directory the service writes to.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for (op, dir) in [
            ("creating work directory", &self.paths.work_dir),
            ("creating converted directory", &self.paths.converted_dir),
            ("creating audit directory", &self.paths.audit_dir),
            ("creating log directory", &self.paths.log_dir),
        ] {
            fs::ensure_dir_all_with_op(op, dir).await?;
        }
        fs::ensure_parent_dir_with_op("creating cookie directory", &self.paths.cookie_file).await
    }
}
