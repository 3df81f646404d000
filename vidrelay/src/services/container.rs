//! Service container: builds the production adapters from [`AppConfig`]
//! and owns their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::JobService;
use crate::Result;
use crate::acquisition::{
    AcquisitionCoordinator, CookieStore, CredentialSource, GlobalBackoff, YtDlpEngine, browser,
};
use crate::config::AppConfig;
use crate::jobs::{AuditLog, JobStateMachine};
use crate::media::{FfprobeProbe, ValidationGate};
use crate::pipeline::PipelineOrchestrator;
use crate::publish::{CloudinaryCredentials, CloudinaryPublisher, Publisher, UnconfiguredPublisher};
use crate::transcode::{FfmpegEngine, TranscodeCoordinator};
use crate::utils::http_client;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServiceContainer {
    pub config: AppConfig,
    pub jobs: Arc<JobStateMachine>,
    pub job_service: Arc<JobService>,
    pub cookies: CookieStore,
    pub backoff: Arc<GlobalBackoff>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Wire yt-dlp, ffmpeg, ffprobe and Cloudinary adapters.
    pub fn new(config: AppConfig) -> Result<Self> {
        let audit = AuditLog::new(&config.paths.audit_dir);
        let cookies = CookieStore::new(&config.paths.cookie_file);
        let backoff = GlobalBackoff::shared(config.acquisition.backoff.clone());

        let probe = FfprobeProbe::new(
            &config.tools.ffprobe,
            Duration::from_secs(config.validation.probe_timeout_secs),
        );
        let gate = ValidationGate::new(Arc::new(probe), config.validation.clone());

        let mut fetcher = YtDlpEngine::new(&config.tools.ytdlp)
            .with_socket_timeout(config.tools.socket_timeout_secs);
        if let Some(referer) = &config.tools.referer {
            fetcher = fetcher.with_referer(referer);
        }

        let wants_browser = config
            .acquisition
            .strategies
            .iter()
            .any(|s| matches!(s.credential, CredentialSource::Browser(_)));
        let browsers = if wants_browser {
            browser::detect_installed()
        } else {
            Vec::new()
        };
        if wants_browser && browsers.is_empty() {
            info!("No local browser found; browser cookie strategies will be skipped");
        }

        let acquisition = AcquisitionCoordinator::new(
            Arc::new(fetcher),
            gate.clone(),
            backoff.clone(),
            cookies.clone(),
            config.acquisition.clone(),
            &config.paths.work_dir,
        )
        .with_browsers(browsers)
        .with_audit(audit.clone());

        let transcode = TranscodeCoordinator::new(
            Arc::new(FfmpegEngine::new(&config.tools.ffmpeg)),
            gate,
            config.transcode.clone(),
            &config.paths.converted_dir,
        )
        .with_audit(audit.clone());

        let publisher = build_publisher(&config)?;
        info!(publisher = publisher.name(), "Publisher configured");

        let jobs = Arc::new(JobStateMachine::new());
        let orchestrator = PipelineOrchestrator::new(
            jobs.clone(),
            Arc::new(acquisition),
            Arc::new(transcode),
            publisher,
            audit,
        );
        let job_service = Arc::new(JobService::new(Arc::new(orchestrator)));

        Ok(Self {
            config,
            jobs,
            job_service,
            cookies,
            backoff,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Stop background tasks and wait for running jobs.
    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        info!(?timeout, "Shutting down services");
        self.cancellation_token.cancel();
        if !self.job_service.shutdown(timeout).await {
            warn!("Some jobs did not finish before shutdown");
        }
        info!("Services shut down");
    }
}

fn build_publisher(config: &AppConfig) -> Result<Arc<dyn Publisher>> {
    let Some(url) = config.publish.cloudinary_url.as_deref() else {
        warn!("CLOUDINARY_URL not set; jobs will fail at the upload stage");
        return Ok(Arc::new(UnconfiguredPublisher));
    };

    let credentials = CloudinaryCredentials::from_url(url)?;
    let client =
        http_client::build_client(Duration::from_secs(config.publish.request_timeout_secs));
    Ok(Arc::new(CloudinaryPublisher::new(
        client,
        credentials,
        &config.publish,
    )))
}
