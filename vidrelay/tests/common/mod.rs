//! Scripted collaborators and a harness that wires them into a real
//! orchestrator and job service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Barrier;

use vidrelay::acquisition::strategy::FORMAT_MINIMAL;
use vidrelay::acquisition::{
    AcquisitionConfig, AcquisitionCoordinator, BackoffConfig, CookieStore, CredentialSource,
    FetchEngine, FetchError, FetchRequest, GlobalBackoff, StrategyConfig,
};
use vidrelay::config::PathsConfig;
use vidrelay::domain::{JobId, JobSnapshot, JobStatus};
use vidrelay::jobs::{AuditLog, JobStateMachine};
use vidrelay::media::{MediaProbe, ProbeError, ProbeReport, ValidationConfig, ValidationGate};
use vidrelay::pipeline::PipelineOrchestrator;
use vidrelay::publish::{PublishError, Publisher};
use vidrelay::services::JobService;
use vidrelay::transcode::tier::default_tiers;
use vidrelay::transcode::{
    EncodeError, EncodeRequest, TranscodeConfig, TranscodeCoordinator, TranscodeEngine,
};

/// Marker bytes the probe reads to simulate missing properties.
pub const NO_VIDEO_MARKER: &[u8] = b"NO_VIDEO_STREAM";
pub const NO_DURATION_MARKER: &[u8] = b"NO_DURATION";

/// Bytes that pass every gate check.
pub fn media_bytes() -> Vec<u8> {
    vec![0x47; 4096]
}

pub fn media_bytes_with(marker: &[u8]) -> Vec<u8> {
    let mut bytes = marker.to_vec();
    bytes.extend(media_bytes());
    bytes
}

/// Probe driven by file contents.
pub struct ContentProbe;

#[async_trait]
impl MediaProbe for ContentProbe {
    async fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ProbeError(e.to_string()))?;
        Ok(ProbeReport {
            has_video_stream: !bytes.starts_with(NO_VIDEO_MARKER),
            duration_seconds: if bytes.starts_with(NO_DURATION_MARKER) { 0.0 } else { 12.5 },
            container_recognized: true,
        })
    }
}

pub fn gate() -> ValidationGate {
    ValidationGate::new(Arc::new(ContentProbe), ValidationConfig::default())
}

pub enum FetchStep {
    Fail(&'static str),
    Write(Vec<u8>),
}

/// Fetch engine replaying a shared script. Once the script runs out every
/// call fails with `fallback`.
pub struct ScriptedFetch {
    steps: Mutex<VecDeque<FetchStep>>,
    fallback: &'static str,
    first_attempt_barrier: Option<Barrier>,
    pub calls: Mutex<Vec<(String, u32, String)>>,
}

impl ScriptedFetch {
    pub fn new(steps: Vec<FetchStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: "ERROR: script exhausted",
            first_attempt_barrier: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing(message: &'static str) -> Self {
        Self {
            fallback: message,
            ..Self::new(Vec::new())
        }
    }

    /// Hold every job's first fetch until `jobs` jobs have reached it.
    pub fn with_first_attempt_barrier(mut self, jobs: usize) -> Self {
        self.first_attempt_barrier = Some(Barrier::new(jobs));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl FetchEngine for ScriptedFetch {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(&self, request: &FetchRequest<'_>) -> Result<PathBuf, FetchError> {
        self.calls.lock().push((
            request.job_id.to_string(),
            request.attempt,
            request.strategy.name.clone(),
        ));
        if request.attempt == 1
            && let Some(barrier) = &self.first_attempt_barrier
        {
            barrier.wait().await;
        }

        let step = self.steps.lock().pop_front();
        match step {
            Some(FetchStep::Fail(message)) => Err(FetchError::new(message)),
            Some(FetchStep::Write(bytes)) => {
                let path = request
                    .output_dir
                    .join(format!("{}.mp4", request.output_prefix()));
                tokio::fs::write(&path, bytes)
                    .await
                    .map_err(|e| FetchError::new(e.to_string()))?;
                Ok(path)
            }
            None => Err(FetchError::new(self.fallback)),
        }
    }
}

pub enum EncodeStep {
    /// Write a gate-valid output.
    Valid,
    /// Write a partial output, then never finish.
    Hang,
    Fail(&'static str),
    /// Write an output the gate rejects.
    Write(Vec<u8>),
}

pub struct ScriptedEncoder {
    steps: Mutex<VecDeque<EncodeStep>>,
    pub outputs: Mutex<Vec<PathBuf>>,
}

impl ScriptedEncoder {
    pub fn new(steps: Vec<EncodeStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            outputs: Mutex::new(Vec::new()),
        }
    }

    async fn run(&self, request: &EncodeRequest<'_>) -> Result<PathBuf, EncodeError> {
        self.outputs.lock().push(request.output.to_path_buf());
        let step = self.steps.lock().pop_front();
        match step {
            Some(EncodeStep::Valid) | None => {
                write(request.output, media_bytes()).await?;
                Ok(request.output.to_path_buf())
            }
            Some(EncodeStep::Hang) => {
                write(request.output, vec![1u8; 512]).await?;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(request.output.to_path_buf())
            }
            Some(EncodeStep::Fail(message)) => Err(EncodeError::new(message)),
            Some(EncodeStep::Write(bytes)) => {
                write(request.output, bytes).await?;
                Ok(request.output.to_path_buf())
            }
        }
    }
}

async fn write(path: &Path, bytes: Vec<u8>) -> Result<(), EncodeError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| EncodeError::new(e.to_string()))
}

#[async_trait]
impl TranscodeEngine for ScriptedEncoder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn encode(&self, request: &EncodeRequest<'_>) -> Result<PathBuf, EncodeError> {
        self.run(request).await
    }

    async fn remux(&self, request: &EncodeRequest<'_>) -> Result<PathBuf, EncodeError> {
        self.run(request).await
    }
}

#[derive(Clone, Copy)]
pub enum PublishStep {
    Succeed,
    Fail(&'static str),
    Panic,
}

/// Publisher counting its invocations.
pub struct ScriptedPublisher {
    step: PublishStep,
    pub calls: AtomicUsize,
    /// Whether the published file existed when publish was called.
    pub saw_file: Mutex<Vec<bool>>,
}

impl ScriptedPublisher {
    pub fn new(step: PublishStep) -> Self {
        Self {
            step,
            calls: AtomicUsize::new(0),
            saw_file: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn publish(&self, path: &Path) -> Result<String, PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.saw_file.lock().push(path.exists());
        match self.step {
            PublishStep::Succeed => {
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("video");
                Ok(format!("https://cdn.example.test/{stem}.mp4"))
            }
            PublishStep::Fail(message) => Err(PublishError(message.to_string())),
            PublishStep::Panic => panic!("publisher blew up"),
        }
    }
}

/// Strategies that need no credential, named `s1..=sN`.
pub fn plain_strategies(count: usize) -> Vec<StrategyConfig> {
    (1..=count)
        .map(|i| StrategyConfig::new(format!("s{i}"), CredentialSource::None, FORMAT_MINIMAL))
        .collect()
}

pub struct HarnessBuilder {
    fetch: ScriptedFetch,
    encoder: ScriptedEncoder,
    publish: PublishStep,
    strategies: usize,
    backoff: BackoffConfig,
    transcode: TranscodeConfig,
}

impl HarnessBuilder {
    pub fn fetch(mut self, fetch: ScriptedFetch) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn encode(mut self, steps: Vec<EncodeStep>) -> Self {
        self.encoder = ScriptedEncoder::new(steps);
        self
    }

    pub fn publish(mut self, step: PublishStep) -> Self {
        self.publish = step;
        self
    }

    pub fn strategies(mut self, count: usize) -> Self {
        self.strategies = count;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn tier_timeout_secs(mut self, tier_index: usize, secs: u64) -> Self {
        self.transcode.tiers[tier_index].timeout_secs = secs;
        self
    }

    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = PathsConfig::rooted_at(dir.path());
        std::fs::create_dir_all(&paths.work_dir).expect("work dir");
        std::fs::create_dir_all(&paths.converted_dir).expect("converted dir");

        let audit = AuditLog::new(&paths.audit_dir);
        let fetch = Arc::new(self.fetch);
        let encoder = Arc::new(self.encoder);
        let publisher = Arc::new(ScriptedPublisher::new(self.publish));
        let backoff = GlobalBackoff::shared(self.backoff.clone());

        let acquisition = AcquisitionCoordinator::new(
            fetch.clone(),
            gate(),
            backoff.clone(),
            CookieStore::new(&paths.cookie_file),
            AcquisitionConfig {
                strategies: plain_strategies(self.strategies),
                backoff: self.backoff,
                attempt_timeout_secs: 30,
                ..AcquisitionConfig::default()
            },
            &paths.work_dir,
        )
        .with_audit(audit.clone());

        let transcode =
            TranscodeCoordinator::new(encoder.clone(), gate(), self.transcode, &paths.converted_dir)
                .with_audit(audit.clone());

        let jobs = Arc::new(JobStateMachine::new());
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            jobs.clone(),
            Arc::new(acquisition),
            Arc::new(transcode),
            publisher.clone(),
            audit.clone(),
        ));

        Harness {
            _dir: dir,
            paths,
            jobs,
            service: Arc::new(JobService::new(orchestrator)),
            fetch,
            encoder,
            publisher,
            backoff,
            audit,
        }
    }
}

pub struct Harness {
    _dir: TempDir,
    pub paths: PathsConfig,
    pub jobs: Arc<JobStateMachine>,
    pub service: Arc<JobService>,
    pub fetch: Arc<ScriptedFetch>,
    pub encoder: Arc<ScriptedEncoder>,
    pub publisher: Arc<ScriptedPublisher>,
    pub backoff: Arc<GlobalBackoff>,
    pub audit: AuditLog,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            fetch: ScriptedFetch::new(vec![FetchStep::Write(media_bytes())]),
            encoder: ScriptedEncoder::new(Vec::new()),
            publish: PublishStep::Succeed,
            strategies: 3,
            backoff: BackoffConfig::disabled(),
            transcode: TranscodeConfig {
                tiers: default_tiers(),
            },
        }
    }

    /// Submit one job and wait for it to finish.
    pub async fn run_one(&self, url: &str) -> JobSnapshot {
        let id = self.service.submit(url, None).expect("submit");
        self.service.wait_idle().await;
        self.service.get_status(&id).expect("status")
    }

    /// Every file left in the work and converted directories.
    pub fn surviving_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for dir in [&self.paths.work_dir, &self.paths.converted_dir] {
            if let Ok(entries) = std::fs::read_dir(dir) {
                files.extend(entries.flatten().map(|e| e.path()).filter(|p| p.is_file()));
            }
        }
        files
    }

    pub fn audit_path(&self, id: &JobId) -> PathBuf {
        self.audit.path_for(id).expect("audit enabled")
    }
}

/// Edges a job may take.
pub const LEGAL_EDGES: &[(JobStatus, JobStatus)] = &[
    (JobStatus::Pending, JobStatus::Acquiring),
    (JobStatus::Acquiring, JobStatus::Transcoding),
    (JobStatus::Acquiring, JobStatus::Failed),
    (JobStatus::Transcoding, JobStatus::Publishing),
    (JobStatus::Transcoding, JobStatus::Failed),
    (JobStatus::Publishing, JobStatus::Completed),
    (JobStatus::Publishing, JobStatus::Failed),
];

pub fn assert_legal_history(jobs: &JobStateMachine, id: &JobId) -> Vec<(JobStatus, JobStatus)> {
    let edges: Vec<_> = jobs
        .history(id)
        .expect("history")
        .into_iter()
        .map(|c| (c.from, c.to))
        .collect();
    for edge in &edges {
        assert!(LEGAL_EDGES.contains(edge), "illegal edge {edge:?} in {edges:?}");
    }
    edges
}
