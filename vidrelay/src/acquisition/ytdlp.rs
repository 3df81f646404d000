//! yt-dlp fetch engine.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use process_utils::{output_with_timeout, tokio_command};
use tracing::{debug, warn};

use super::engine::{FetchEngine, FetchError, FetchRequest};

/// Desktop browser user agents rotated between attempts.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
];

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Request headers a real browser with `user_agent` would send.
///
/// Chromium-based agents also get the matching client-hint headers.
pub fn browser_headers(user_agent: &str) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("Accept", ACCEPT.to_string()),
        ("Accept-Language", ACCEPT_LANGUAGE.to_string()),
        ("Sec-Fetch-Dest", "document".to_string()),
        ("Sec-Fetch-Mode", "navigate".to_string()),
        ("Sec-Fetch-Site", "none".to_string()),
        ("Sec-Fetch-User", "?1".to_string()),
        ("Upgrade-Insecure-Requests", "1".to_string()),
    ];

    let brand = if user_agent.contains("Edg/") {
        Some(r#""Microsoft Edge";v="131", "Chromium";v="131", "Not_A Brand";v="24""#)
    } else if user_agent.contains("Chrome/") {
        Some(r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#)
    } else {
        None
    };

    if let Some(brand) = brand {
        let platform = if user_agent.contains("Macintosh") {
            "\"macOS\""
        } else {
            "\"Windows\""
        };
        headers.push(("sec-ch-ua", brand.to_string()));
        headers.push(("sec-ch-ua-mobile", "?0".to_string()));
        headers.push(("sec-ch-ua-platform", platform.to_string()));
    }
    headers
}

/// Suffixes of yt-dlp's in-progress and sidecar files.
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

/// [`FetchEngine`] that shells out to yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    binary: PathBuf,
    socket_timeout_secs: u64,
    referer: Option<String>,
}

impl YtDlpEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            socket_timeout_secs: 45,
            referer: None,
        }
    }

    pub fn with_socket_timeout(mut self, secs: u64) -> Self {
        self.socket_timeout_secs = secs;
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    fn pick_user_agent() -> &'static str {
        let idx = (rand::random::<u64>() % USER_AGENTS.len() as u64) as usize;
        USER_AGENTS[idx]
    }

    /// Build the yt-dlp argument list for one attempt.
    pub fn build_args(&self, request: &FetchRequest<'_>, user_agent: Option<&str>) -> Vec<String> {
        let strategy = request.strategy;
        let template = request
            .output_dir
            .join(format!("{}.%(ext)s", request.output_prefix()));

        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--no-warnings".to_string(),
            "--force-ipv4".to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout_secs.to_string(),
            "--retries".to_string(),
            "3".to_string(),
            "--fragment-retries".to_string(),
            "5".to_string(),
            "-f".to_string(),
            strategy.format_selector.clone(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
        ];

        if let Some(ua) = user_agent {
            args.push("--user-agent".to_string());
            args.push(ua.to_string());
            for (name, value) in browser_headers(ua) {
                args.push("--add-header".to_string());
                args.push(format!("{name}:{value}"));
            }
        }

        if let Some(referer) = &self.referer {
            args.push("--referer".to_string());
            args.push(referer.clone());
        }

        if strategy.geo_bypass {
            args.push("--geo-bypass".to_string());
            if let Some(country) = &strategy.geo_bypass_country {
                args.push("--geo-bypass-country".to_string());
                args.push(country.clone());
            }
        }

        if let Some(cookie_file) = request.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookie_file.to_string_lossy().into_owned());
        } else if let Some(browser) = request.browser {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.as_str().to_string());
        }

        args.extend(strategy.extra_args.iter().cloned());

        args.push("--".to_string());
        args.push(request.url.to_string());
        args
    }
}

/// Files in `dir` produced for `prefix`, as `(path, size)`.
async fn outputs_for_prefix(dir: &Path, prefix: &str) -> Vec<(PathBuf, u64)> {
    let mut found = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return found;
    };

    let dotted = format!("{prefix}.");
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&dotted) {
            continue;
        }
        if let Ok(meta) = entry.metadata().await
            && meta.is_file()
        {
            found.push((entry.path(), meta.len()));
        }
    }
    found
}

fn is_partial(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

async fn remove_output(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove download leftover");
    }
}

async fn remove_outputs(dir: &Path, prefix: &str) {
    for (path, _) in outputs_for_prefix(dir, prefix).await {
        remove_output(&path).await;
    }
}

#[async_trait]
impl FetchEngine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(&self, request: &FetchRequest<'_>) -> Result<PathBuf, FetchError> {
        let prefix = request.output_prefix();
        let user_agent = request
            .strategy
            .rotate_user_agent
            .then(Self::pick_user_agent);
        let args = self.build_args(request, user_agent);

        debug!(
            job_id = %request.job_id,
            strategy = %request.strategy.name,
            attempt = request.attempt,
            "Starting yt-dlp"
        );

        let mut cmd = tokio_command(&self.binary);
        cmd.args(&args);

        let output = match output_with_timeout(&mut cmd, request.timeout).await {
            Ok(output) => output,
            Err(e) => {
                return Err(FetchError::new(format!("Failed to start yt-dlp: {e}")));
            }
        };

        if output.timed_out() {
            remove_outputs(request.output_dir, &prefix).await;
            return Err(FetchError::timeout(request.timeout));
        }

        if !output.success() {
            remove_outputs(request.output_dir, &prefix).await;
            let stderr = output.stderr_lossy();
            let message = if stderr.trim().is_empty() {
                format!("yt-dlp exited with code {:?}", output.code())
            } else {
                stderr
            };
            return Err(FetchError {
                message,
                exit_code: output.code(),
                timed_out: false,
            });
        }

        let mut produced = outputs_for_prefix(request.output_dir, &prefix).await;
        produced.retain(|(path, _)| !is_partial(path));
        produced.sort_by_key(|(_, size)| std::cmp::Reverse(*size));

        let Some((best, _)) = produced.first().cloned() else {
            remove_outputs(request.output_dir, &prefix).await;
            return Err(FetchError::new("yt-dlp reported success but produced no file"));
        };

        // Leftover intermediate streams from a merge.
        for (path, _) in produced.iter().skip(1) {
            remove_output(path).await;
        }
        for (path, _) in outputs_for_prefix(request.output_dir, &prefix).await {
            if is_partial(&path) {
                remove_output(&path).await;
            }
        }

        Ok(best)
    }
}
