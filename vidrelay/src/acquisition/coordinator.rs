//! Acquisition coordinator.
//!
//! Walks the configured strategies in order. Before every fetch call it
//! waits on the shared [`GlobalBackoff`]. Each outcome is classified:
//! a fatal failure ends acquisition at once; a retryable failure (including
//! a downloaded file the validation gate rejects) moves on to the next
//! strategy. The per-job attempt cap and wall-time cap bound the whole walk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info, warn};

use super::backoff::GlobalBackoff;
use super::browser::{self, BrowserKind};
use super::classify::classify_fetch_error;
use super::credentials::{CookieFile, CookieStore, CredentialBlob};
use super::engine::{FetchEngine, FetchError, FetchRequest};
use super::strategy::{AcquisitionConfig, CredentialSource};
use crate::domain::JobId;
use crate::jobs::{AuditLog, AuditStep};
use crate::media::ValidationGate;
use crate::pipeline::handle::LocalFileHandle;

/// Result of one fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Retryable(String),
    Fatal(String),
}

enum AttemptFailure {
    Retryable(String),
    Fatal(String),
}

/// One attempt, kept for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub strategy: String,
    pub attempt: u32,
    /// Backoff delay waited before the attempt.
    pub delay: Duration,
    pub outcome: AttemptOutcome,
}

/// A validated acquired file.
#[derive(Debug)]
pub struct Acquired {
    pub file: LocalFileHandle,
    pub strategy: String,
    pub attempts: Vec<AttemptRecord>,
}

/// Unresolvable acquisition outcome.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("{reason}")]
    Fatal {
        reason: String,
        attempts: Vec<AttemptRecord>,
    },
    #[error("All download strategies failed. Last error: {last_reason}")]
    Exhausted {
        last_reason: String,
        attempts: Vec<AttemptRecord>,
    },
}

impl AcquisitionError {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Fatal { attempts, .. } | Self::Exhausted { attempts, .. } => attempts,
        }
    }
}

/// Drives a [`FetchEngine`] through the strategy list.
pub struct AcquisitionCoordinator {
    engine: Arc<dyn FetchEngine>,
    gate: ValidationGate,
    backoff: Arc<GlobalBackoff>,
    cookies: CookieStore,
    config: AcquisitionConfig,
    work_dir: PathBuf,
    browsers: Vec<BrowserKind>,
    audit: AuditLog,
}

impl AcquisitionCoordinator {
    pub fn new(
        engine: Arc<dyn FetchEngine>,
        gate: ValidationGate,
        backoff: Arc<GlobalBackoff>,
        cookies: CookieStore,
        config: AcquisitionConfig,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            gate,
            backoff,
            cookies,
            config,
            work_dir: work_dir.into(),
            browsers: Vec::new(),
            audit: AuditLog::disabled(),
        }
    }

    /// Browsers available to browser-cookie strategies.
    pub fn with_browsers(mut self, browsers: Vec<BrowserKind>) -> Self {
        self.browsers = browsers;
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn backoff(&self) -> &Arc<GlobalBackoff> {
        &self.backoff
    }

    /// Materialize the job's own credential, if it has a usable one.
    async fn job_cookie(
        &self,
        job_id: &JobId,
        credential: Option<&CredentialBlob>,
    ) -> Option<CookieFile> {
        let blob = credential.filter(|c| !c.is_empty())?;

        let text = match blob.decode() {
            Ok(text) => text,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Ignoring unusable job credential");
                return None;
            }
        };

        match CookieFile::write(&self.work_dir, job_id, &text).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to materialize job credential");
                None
            }
        }
    }

    /// Acquire `url` into a validated local file.
    ///
    /// Any per-job cookie file is removed before this returns.
    pub async fn acquire(
        &self,
        job_id: &JobId,
        url: &str,
        credential: Option<&CredentialBlob>,
    ) -> Result<Acquired, AcquisitionError> {
        let job_cookie = self.job_cookie(job_id, credential).await;
        let stored_available = self.cookies.is_available().await;

        let started = Instant::now();
        let max_elapsed = Duration::from_secs(self.config.max_elapsed_secs);
        let attempt_timeout = Duration::from_secs(self.config.attempt_timeout_secs);
        let grace = Duration::from_millis(self.config.engine_grace_ms);

        let mut attempt: u32 = 0;
        let mut records = Vec::new();
        let mut last_reason: Option<String> = None;

        'rounds: for round in 0..self.config.rounds {
            for strategy in &self.config.strategies {
                let (cookie_file, browser) = match strategy.credential {
                    CredentialSource::Provided => (job_cookie.as_ref().map(|c| c.path()), None),
                    CredentialSource::StoredDefault if stored_available => {
                        (Some(self.cookies.path()), None)
                    }
                    CredentialSource::Browser(wanted) => {
                        (None, browser::choose(wanted, &self.browsers))
                    }
                    CredentialSource::StoredDefault | CredentialSource::None => (None, None),
                };
                let has_credential = cookie_file.is_some() || browser.is_some();
                if strategy.credential != CredentialSource::None && !has_credential {
                    debug!(job_id = %job_id, strategy = %strategy.name, "Skipping strategy without credential");
                    continue;
                }

                if attempt >= self.config.max_attempts {
                    info!(job_id = %job_id, attempts = attempt, "Acquisition attempt cap reached");
                    break 'rounds;
                }
                let elapsed = started.elapsed();
                if elapsed >= max_elapsed {
                    info!(job_id = %job_id, elapsed_secs = elapsed.as_secs(), "Acquisition time cap reached");
                    last_reason.get_or_insert_with(|| "Acquisition time limit exceeded".to_string());
                    break 'rounds;
                }
                let Some(delay) = self.backoff.wait_within(max_elapsed - elapsed).await else {
                    info!(job_id = %job_id, "Backoff delay would pass the acquisition time cap");
                    last_reason.get_or_insert_with(|| "Acquisition time limit exceeded".to_string());
                    break 'rounds;
                };
                let remaining = max_elapsed.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    last_reason.get_or_insert_with(|| "Acquisition time limit exceeded".to_string());
                    break 'rounds;
                }
                attempt += 1;
                let timeout = attempt_timeout.min(remaining);

                self.audit
                    .record(
                        job_id,
                        AuditStep::AcquireAttempt,
                        json!({
                            "strategy": strategy.name,
                            "attempt": attempt,
                            "round": round + 1,
                            "delay_ms": delay.as_millis() as u64,
                            "with_credential": has_credential,
                            "browser": browser.map(|b| b.as_str()),
                        }),
                    )
                    .await;
                info!(
                    job_id = %job_id,
                    strategy = %strategy.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Acquisition attempt"
                );

                let request = FetchRequest {
                    job_id,
                    attempt,
                    url,
                    strategy,
                    cookie_file,
                    browser,
                    output_dir: &self.work_dir,
                    timeout,
                };
                let outcome = self.attempt(&request, grace).await;

                match outcome {
                    Ok(file) => {
                        self.backoff.record_success();
                        records.push(AttemptRecord {
                            strategy: strategy.name.clone(),
                            attempt,
                            delay,
                            outcome: AttemptOutcome::Success,
                        });
                        return Ok(Acquired {
                            file,
                            strategy: strategy.name.clone(),
                            attempts: records,
                        });
                    }
                    Err(AttemptFailure::Fatal(reason)) => {
                        warn!(job_id = %job_id, strategy = %strategy.name, %reason, "Fatal acquisition failure");
                        records.push(AttemptRecord {
                            strategy: strategy.name.clone(),
                            attempt,
                            delay,
                            outcome: AttemptOutcome::Fatal(reason.clone()),
                        });
                        return Err(AcquisitionError::Fatal {
                            reason,
                            attempts: records,
                        });
                    }
                    Err(AttemptFailure::Retryable(reason)) => {
                        let failures = self.backoff.record_failure();
                        warn!(
                            job_id = %job_id,
                            strategy = %strategy.name,
                            attempt,
                            failures,
                            %reason,
                            "Retryable acquisition failure"
                        );
                        records.push(AttemptRecord {
                            strategy: strategy.name.clone(),
                            attempt,
                            delay,
                            outcome: AttemptOutcome::Retryable(reason.clone()),
                        });
                        last_reason = Some(reason);
                    }
                }
            }
        }

        drop(job_cookie);
        Err(AcquisitionError::Exhausted {
            last_reason: last_reason
                .unwrap_or_else(|| "No applicable download strategy".to_string()),
            attempts: records,
        })
    }

    /// One fetch call plus validation of its output.
    ///
    /// The engine is expected to honor `request.timeout` itself; `grace` on
    /// top of that bounds an engine that does not.
    async fn attempt(
        &self,
        request: &FetchRequest<'_>,
        grace: Duration,
    ) -> Result<LocalFileHandle, AttemptFailure> {
        let job_id = request.job_id;
        let fetched =
            match tokio::time::timeout(request.timeout + grace, self.engine.fetch(request)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(job_id = %job_id, strategy = %request.strategy.name, "Fetch engine ignored its timeout");
                    Err(FetchError::timeout(request.timeout))
                }
            };

        let path = match fetched {
            Ok(path) => path,
            Err(error) => {
                let classification = classify_fetch_error(&error, request.has_credential());
                return Err(if classification.is_fatal() {
                    AttemptFailure::Fatal(classification.reason)
                } else {
                    AttemptFailure::Retryable(classification.reason)
                });
            }
        };

        let file = LocalFileHandle::new(path);
        match self.gate.inspect(file.path()).await {
            Ok(report) => {
                debug!(
                    job_id = %job_id,
                    duration = report.duration_seconds,
                    "Acquired file passed validation"
                );
                Ok(file)
            }
            Err(failure) => {
                if let Err(e) = file.release().await {
                    warn!(job_id = %job_id, error = %e, "Failed to remove rejected download");
                }
                Err(AttemptFailure::Retryable(format!(
                    "Downloaded file failed validation: {failure}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::backoff::BackoffConfig;
    use crate::acquisition::strategy::default_strategies;
    use crate::media::{MediaProbe, ProbeError, ProbeReport};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;

    struct OkProbe;

    #[async_trait]
    impl MediaProbe for OkProbe {
        async fn probe(&self, _path: &Path) -> Result<ProbeReport, ProbeError> {
            Ok(ProbeReport {
                has_video_stream: true,
                duration_seconds: 3.0,
                container_recognized: true,
            })
        }
    }

    enum Step {
        Fail(&'static str),
        Write(usize),
        /// Never returns, whatever the request timeout says.
        Hang,
        /// Runs until the request timeout, then reports it.
        Stall,
    }

    struct ScriptedEngine {
        steps: Mutex<Vec<Step>>,
        seen: Mutex<Vec<(String, Option<PathBuf>, bool)>>,
        browsers: Mutex<Vec<Option<BrowserKind>>>,
    }

    impl ScriptedEngine {
        fn new(mut steps: Vec<Step>) -> Arc<Self> {
            steps.reverse();
            Arc::new(Self {
                steps: Mutex::new(steps),
                seen: Mutex::new(Vec::new()),
                browsers: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FetchEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self, request: &FetchRequest<'_>) -> Result<PathBuf, FetchError> {
            let cookie_exists = request.cookie_file.is_some_and(|p| p.exists());
            self.seen.lock().push((
                request.strategy.name.clone(),
                request.cookie_file.map(Path::to_path_buf),
                cookie_exists,
            ));
            self.browsers.lock().push(request.browser);
            let step = self.steps.lock().pop();
            match step {
                Some(Step::Fail(msg)) => Err(FetchError::new(msg)),
                Some(Step::Write(len)) => {
                    let path = request
                        .output_dir
                        .join(format!("{}.mp4", request.output_prefix()));
                    tokio::fs::write(&path, vec![7u8; len]).await.unwrap();
                    Ok(path)
                }
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(FetchError::new("woke up"))
                }
                Some(Step::Stall) => {
                    tokio::time::sleep(request.timeout).await;
                    Err(FetchError::timeout(request.timeout))
                }
                None => Err(FetchError::new("script exhausted")),
            }
        }
    }

    fn coordinator(
        engine: Arc<ScriptedEngine>,
        dir: &Path,
        config: AcquisitionConfig,
    ) -> AcquisitionCoordinator {
        let backoff = GlobalBackoff::shared(config.backoff.clone());
        AcquisitionCoordinator::new(
            engine,
            ValidationGate::new(Arc::new(OkProbe), Default::default()),
            backoff,
            CookieStore::new(dir.join("cookies.txt")),
            config,
            dir,
        )
    }

    fn fast_config() -> AcquisitionConfig {
        AcquisitionConfig {
            backoff: BackoffConfig::disabled(),
            ..AcquisitionConfig::default()
        }
    }

    const COOKIES: &str = "# Netscape HTTP Cookie File\n.example.org\tTRUE\t/\tTRUE\t0\tSID\tx\n";

    #[tokio::test]
    async fn test_success_resets_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![Step::Fail("HTTP Error 429"), Step::Write(4096)]);
        let coord = coordinator(engine.clone(), dir.path(), fast_config());

        let acquired = coord
            .acquire(&JobId::from("j"), "https://v.example/1", None)
            .await
            .unwrap();

        // Credential strategies are skipped without cookies.
        assert_eq!(acquired.strategy, "minimal");
        assert_eq!(acquired.attempts.len(), 2);
        assert!(acquired.file.path().exists());
        assert_eq!(coord.backoff().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![Step::Fail("ERROR: Private video"), Step::Write(4096)]);
        let coord = coordinator(engine.clone(), dir.path(), fast_config());

        let err = coord
            .acquire(&JobId::from("j"), "https://v.example/1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Fatal { .. }));
        assert_eq!(err.attempts().len(), 1);
        assert_eq!(engine.seen.lock().len(), 1);
        assert_eq!(coord.backoff().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_gate_rejection_is_retryable_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![Step::Write(0), Step::Write(10)]);
        let coord = coordinator(engine, dir.path(), fast_config());

        let err = coord
            .acquire(&JobId::from("j"), "https://v.example/1", None)
            .await
            .unwrap_err();
        match &err {
            AcquisitionError::Exhausted { last_reason, .. } => {
                assert!(last_reason.contains("failed validation"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!dir.path().join("j_1.mp4").exists());
        assert!(!dir.path().join("j_2.mp4").exists());
        assert_eq!(coord.backoff().consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn test_provided_credential_used_then_removed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![Step::Fail("HTTP Error 403"), Step::Write(4096)]);
        let coord = coordinator(engine.clone(), dir.path(), fast_config());
        let blob = CredentialBlob::new(COOKIES);

        let acquired = coord
            .acquire(&JobId::from("j"), "https://v.example/1", Some(&blob))
            .await
            .unwrap();
        assert_eq!(acquired.strategy, "relaxed");

        let seen = engine.seen.lock();
        assert_eq!(seen[0].0, "provided_credential");
        assert!(seen[0].2, "cookie file should exist during the attempt");
        let cookie_path = seen[0].1.clone().unwrap();
        assert!(!cookie_path.exists(), "cookie file should be gone after acquire");
    }

    #[tokio::test]
    async fn test_stored_credential_used_when_available() {
        let dir = tempfile::tempdir().unwrap();
        CookieStore::new(dir.path().join("cookies.txt"))
            .save(COOKIES)
            .await
            .unwrap();
        let engine = ScriptedEngine::new(vec![Step::Write(4096)]);
        let coord = coordinator(engine.clone(), dir.path(), fast_config());

        let acquired = coord
            .acquire(&JobId::from("j"), "https://v.example/1", None)
            .await
            .unwrap();
        assert_eq!(acquired.strategy, "stored_credential");
        assert!(dir.path().join("cookies.txt").exists());
    }

    #[tokio::test]
    async fn test_attempt_cap_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![]);
        let config = AcquisitionConfig {
            rounds: 5,
            max_attempts: 3,
            ..fast_config()
        };
        let coord = coordinator(engine.clone(), dir.path(), config);

        let err = coord
            .acquire(&JobId::from("j"), "https://v.example/1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Exhausted { .. }));
        assert_eq!(engine.seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_no_applicable_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![]);
        let config = AcquisitionConfig {
            strategies: default_strategies()
                .into_iter()
                .filter(|s| s.credential != CredentialSource::None)
                .collect(),
            ..fast_config()
        };
        let coord = coordinator(engine.clone(), dir.path(), config);

        let err = coord
            .acquire(&JobId::from("j"), "https://v.example/1", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No applicable download strategy"));
        assert!(engine.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_hanging_engine_is_a_retryable_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![Step::Hang, Step::Write(4096)]);
        let config = AcquisitionConfig {
            attempt_timeout_secs: 1,
            engine_grace_ms: 50,
            ..fast_config()
        };
        let coord = coordinator(engine.clone(), dir.path(), config);

        let started = Instant::now();
        let acquired = coord
            .acquire(&JobId::from("j"), "https://v.example/1", None)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));

        assert_eq!(acquired.strategy, "minimal");
        match &acquired.attempts[0].outcome {
            AttemptOutcome::Retryable(reason) => assert!(reason.contains("timed out"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(engine.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_wall_time_cap_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![Step::Stall, Step::Write(4096)]);
        let config = AcquisitionConfig {
            attempt_timeout_secs: 30,
            max_elapsed_secs: 1,
            ..fast_config()
        };
        let coord = coordinator(engine.clone(), dir.path(), config);

        let err = coord
            .acquire(&JobId::from("j"), "https://v.example/1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Exhausted { .. }));
        assert_eq!(err.attempts().len(), 1);
        assert_eq!(engine.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_backoff_past_wall_cap_skips_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![Step::Write(4096)]);
        let config = AcquisitionConfig {
            max_elapsed_secs: 1,
            backoff: BackoffConfig {
                base_min_ms: 1_200,
                base_max_ms: 1_200,
                step_ms: 0,
                max_delay_ms: 1_200,
            },
            ..AcquisitionConfig::default()
        };
        let coord = coordinator(engine.clone(), dir.path(), config);

        let started = Instant::now();
        let err = coord
            .acquire(&JobId::from("j"), "https://v.example/1", None)
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));

        match &err {
            AcquisitionError::Exhausted { last_reason, attempts } => {
                assert!(last_reason.contains("time limit"), "{last_reason}");
                assert!(attempts.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(engine.seen.lock().is_empty());
        assert_eq!(coord.backoff().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_browser_strategy_needs_installed_browser() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![Step::Fail("Sign in to confirm you're not a bot"), Step::Write(4096)]);
        let coord = coordinator(engine.clone(), dir.path(), fast_config())
            .with_browsers(vec![BrowserKind::Firefox]);

        let acquired = coord
            .acquire(&JobId::from("j"), "https://v.example/1", None)
            .await
            .unwrap();
        assert_eq!(acquired.strategy, "relaxed");

        let seen = engine.seen.lock();
        assert_eq!(seen[0].0, "browser_cookies");
        assert_eq!(seen[0].1, None);
        assert_eq!(*engine.browsers.lock(), [Some(BrowserKind::Firefox), None]);
    }
}
