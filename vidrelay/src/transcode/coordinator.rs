//! Transcode coordinator.
//!
//! Tries each configured tier once, in order. Every tier's output is owned by
//! a [`LocalFileHandle`] from before the engine starts, so a timed-out or
//! rejected attempt never leaves a partial file behind. Engine success is
//! not trusted: the output must pass the validation gate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};

use super::engine::{EncodeError, EncodeRequest, TranscodeEngine};
use super::tier::{CodecTier, TierParams, TranscodeConfig};
use crate::domain::JobId;
use crate::jobs::{AuditLog, AuditStep};
use crate::media::ValidationGate;
use crate::pipeline::handle::LocalFileHandle;
use crate::utils::fs;

/// What happened to one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    Success,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TierRecord {
    pub tier: CodecTier,
    pub elapsed: Duration,
    pub outcome: TierOutcome,
}

/// A validated transcoded file.
#[derive(Debug)]
pub struct Transcoded {
    pub file: LocalFileHandle,
    pub tier: CodecTier,
    pub tiers: Vec<TierRecord>,
}

/// Every tier failed.
#[derive(Debug, thiserror::Error)]
#[error("All conversion attempts failed. Last error: {last_error}")]
pub struct TranscodeError {
    pub last_error: String,
    pub tiers: Vec<TierRecord>,
}

/// Drives a [`TranscodeEngine`] through the tier chain.
pub struct TranscodeCoordinator {
    engine: Arc<dyn TranscodeEngine>,
    gate: ValidationGate,
    config: TranscodeConfig,
    output_dir: PathBuf,
    audit: AuditLog,
}

impl TranscodeCoordinator {
    pub fn new(
        engine: Arc<dyn TranscodeEngine>,
        gate: ValidationGate,
        config: TranscodeConfig,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            gate,
            config,
            output_dir: output_dir.into(),
            audit: AuditLog::disabled(),
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    fn output_path(&self, job_id: &JobId, params: &TierParams) -> PathBuf {
        self.output_dir
            .join(format!("{job_id}_{}.{}", params.tier, params.container))
    }

    /// Transcode `input`, which stays owned by the caller.
    pub async fn transcode(
        &self,
        job_id: &JobId,
        input: &LocalFileHandle,
    ) -> Result<Transcoded, TranscodeError> {
        let mut records = Vec::with_capacity(self.config.tiers.len());
        let mut last_error = String::from("no transcode tier configured");

        if let Err(e) = fs::ensure_dir_all_with_op("creating converted directory", &self.output_dir).await {
            return Err(TranscodeError {
                last_error: e.to_string(),
                tiers: records,
            });
        }

        for params in &self.config.tiers {
            let started = Instant::now();
            let result = self.run_tier(job_id, input, params).await;
            let elapsed = started.elapsed();

            match result {
                Ok(file) => {
                    info!(job_id = %job_id, tier = %params.tier, elapsed_ms = elapsed.as_millis() as u64, "Transcode tier succeeded");
                    self.audit
                        .record(
                            job_id,
                            AuditStep::TranscodeTier,
                            json!({"tier": params.tier, "ok": true, "elapsed_ms": elapsed.as_millis() as u64}),
                        )
                        .await;
                    records.push(TierRecord {
                        tier: params.tier,
                        elapsed,
                        outcome: TierOutcome::Success,
                    });
                    return Ok(Transcoded {
                        file,
                        tier: params.tier,
                        tiers: records,
                    });
                }
                Err(reason) => {
                    warn!(job_id = %job_id, tier = %params.tier, %reason, "Transcode tier failed");
                    self.audit
                        .record(
                            job_id,
                            AuditStep::TranscodeTier,
                            json!({"tier": params.tier, "ok": false, "error": reason, "elapsed_ms": elapsed.as_millis() as u64}),
                        )
                        .await;
                    records.push(TierRecord {
                        tier: params.tier,
                        elapsed,
                        outcome: TierOutcome::Failed(reason.clone()),
                    });
                    last_error = reason;
                }
            }
        }

        Err(TranscodeError {
            last_error,
            tiers: records,
        })
    }

    async fn run_tier(
        &self,
        job_id: &JobId,
        input: &LocalFileHandle,
        params: &TierParams,
    ) -> Result<LocalFileHandle, String> {
        let output = self.output_path(job_id, params);
        // Owns any partial output from here on.
        let reserved = LocalFileHandle::new(&output);
        let timeout = Duration::from_secs(params.timeout_secs);

        let request = EncodeRequest {
            input: input.path(),
            output: &output,
            params,
            timeout,
        };

        let call = async {
            if params.is_remux() {
                self.engine.remux(&request).await
            } else {
                self.engine.encode(&request).await
            }
        };

        let produced = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                release_quietly(reserved).await;
                return Err(describe(params.tier, &e));
            }
            Err(_) => {
                release_quietly(reserved).await;
                return Err(describe(params.tier, &EncodeError::timeout(timeout)));
            }
        };

        let file = if produced == output {
            reserved
        } else {
            release_quietly(reserved).await;
            LocalFileHandle::new(produced)
        };

        match self.gate.inspect(file.path()).await {
            Ok(_) => Ok(file),
            Err(failure) => {
                release_quietly(file).await;
                Err(format!("{} output failed validation: {failure}", params.tier))
            }
        }
    }
}

fn describe(tier: CodecTier, error: &EncodeError) -> String {
    format!("{tier} tier: {error}")
}

async fn release_quietly(handle: LocalFileHandle) {
    let path = handle.path().to_path_buf();
    if let Err(e) = handle.release().await {
        warn!(path = %path.display(), error = %e, "Failed to remove transcode output");
    }
}
