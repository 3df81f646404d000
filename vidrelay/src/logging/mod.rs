//! Logging setup: reloadable filter, console plus daily-rolled file output,
//! and retention of rolled files.

use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "vidrelay=info,tower_http=info";

/// Rolled files are named `<LOG_FILE_NAME>.YYYY-MM-DD`.
pub const LOG_FILE_NAME: &str = "vidrelay.log";

const LOG_RETENTION_DAYS: i64 = 7;

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// One rolled log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFileInfo {
    pub filename: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    pub size_bytes: u64,
}

/// Handle to the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    pub fn new(handle: FilterHandle, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            handle,
            log_dir: log_dir.into(),
        }
    }

    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the active filter directive.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::Other(format!("Invalid filter directive: {e}")))?;
        self.handle
            .reload(filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {e}")))?;
        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    /// Rolled log files, newest first.
    pub async fn list_files(&self) -> std::io::Result<Vec<LogFileInfo>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.log_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(date) = rolled_date(&filename) else {
                continue;
            };
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            files.push(LogFileInfo {
                filename,
                date: date.format("%Y-%m-%d").to_string(),
                size_bytes: meta.len(),
            });
        }

        files.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(files)
    }

    /// Sweep old log files now and then once a day until `cancel_token` fires.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let interval = Duration::from_secs(24 * 60 * 60);
            loop {
                match cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS, Utc::now().date_naive()).await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "Cleaned up old log files"),
                    Err(e) => warn!(error = %e, "Failed to clean up old logs"),
                }

                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    }
}

/// Date suffix of a rolled log file name.
fn rolled_date(filename: &str) -> Option<NaiveDate> {
    let date = filename.strip_prefix(LOG_FILE_NAME)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Delete rolled log files dated more than `retention_days` before `today`.
/// Returns how many files were removed.
async fn cleanup_old_logs(
    log_dir: &Path,
    retention_days: i64,
    today: NaiveDate,
) -> std::io::Result<usize> {
    let cutoff = today - chrono::Duration::days(retention_days);

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(date) = path.file_name().and_then(|n| n.to_str()).and_then(rolled_date) else {
            continue;
        };

        if date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    Ok(deleted)
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init_logging(log_dir: &Path) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    fs::ensure_dir_all_sync_with_op("creating log directory", log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok((Arc::new(LoggingConfig::new(handle, log_dir)), guard))
}
