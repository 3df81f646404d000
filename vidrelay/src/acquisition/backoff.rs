//! Process-wide acquisition backoff.
//!
//! Every acquisition attempt in the process, whatever job it belongs to,
//! waits a randomized delay before calling the fetch engine. The delay range
//! moves up by `step_ms` for every consecutive retryable failure seen by any
//! job, so a burst of upstream blocking slows the whole process down. One
//! success resets the counter.
//!
//! The lock is only held to read or update the counter; the delay itself is
//! awaited after the guard is dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Delay range parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Lower bound of the delay with no recorded failures.
    pub base_min_ms: u64,
    /// Upper bound of the delay with no recorded failures.
    pub base_max_ms: u64,
    /// How far both bounds move per consecutive failure.
    pub step_ms: u64,
    /// Hard ceiling for any delay.
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_min_ms: 5_000,
            base_max_ms: 15_000,
            step_ms: 10_000,
            max_delay_ms: 300_000,
        }
    }
}

impl BackoffConfig {
    /// No waiting at all.
    pub fn disabled() -> Self {
        Self {
            base_min_ms: 0,
            base_max_ms: 0,
            step_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Check that the range is well-formed and grows monotonically.
    ///
    /// A step at least as wide as the base range means every delay drawn
    /// after `n + 1` failures is at least as long as any delay drawn after
    /// `n` failures.
    pub fn validate(&self) -> crate::Result<()> {
        if self.base_min_ms > self.base_max_ms {
            return Err(crate::Error::config(format!(
                "backoff base_min_ms ({}) exceeds base_max_ms ({})",
                self.base_min_ms, self.base_max_ms
            )));
        }
        if self.step_ms < self.base_max_ms - self.base_min_ms {
            return Err(crate::Error::config(format!(
                "backoff step_ms ({}) must be at least the base range width ({})",
                self.step_ms,
                self.base_max_ms - self.base_min_ms
            )));
        }
        if self.max_delay_ms < self.base_min_ms {
            return Err(crate::Error::config(format!(
                "backoff max_delay_ms ({}) is below base_min_ms ({})",
                self.max_delay_ms, self.base_min_ms
            )));
        }
        Ok(())
    }

    /// Inclusive delay range after `failures` consecutive failures.
    pub fn range_for(&self, failures: u32) -> (u64, u64) {
        let shift = self.step_ms.saturating_mul(u64::from(failures));
        let lo = self.base_min_ms.saturating_add(shift).min(self.max_delay_ms);
        let hi = self.base_max_ms.saturating_add(shift).min(self.max_delay_ms);
        (lo, hi.max(lo))
    }

    /// Draw a delay from the range for `failures`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let (lo, hi) = self.range_for(failures);
        let width = hi - lo;
        let jitter = if width == 0 {
            0
        } else {
            (width as f64 * rand::random::<f64>()).round() as u64
        };
        Duration::from_millis(lo + jitter.min(width))
    }
}

#[derive(Debug, Default)]
struct BackoffState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the shared counter.
#[derive(Debug, Clone, Serialize)]
pub struct BackoffSnapshot {
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Shared consecutive-failure counter.
#[derive(Debug)]
pub struct GlobalBackoff {
    config: BackoffConfig,
    state: Mutex<BackoffState>,
}

impl GlobalBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BackoffState::default()),
        }
    }

    pub fn shared(config: BackoffConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BackoffSnapshot {
        let state = self.state.lock();
        BackoffSnapshot {
            consecutive_failures: state.consecutive_failures,
            last_failure_at: state.last_failure_at,
        }
    }

    /// Draw the delay for the next attempt and await it, provided it ends
    /// within `budget`.
    ///
    /// Returns the delay that was waited, or `None` without sleeping when the
    /// drawn delay would use up the whole budget.
    pub async fn wait_within(&self, budget: Duration) -> Option<Duration> {
        let (failures, since_last) = {
            let state = self.state.lock();
            (
                state.consecutive_failures,
                state.last_failure.map(|t| t.elapsed()),
            )
        };

        let delay = self.config.delay_for(failures);
        if delay >= budget {
            debug!(
                failures,
                delay_ms = delay.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                "Backoff delay exceeds remaining budget"
            );
            return None;
        }
        if !delay.is_zero() {
            debug!(
                failures,
                delay_ms = delay.as_millis() as u64,
                since_last_failure_ms = since_last.map(|d| d.as_millis() as u64),
                "Acquisition backoff"
            );
            tokio::time::sleep(delay).await;
        }
        Some(delay)
    }

    /// Record a retryable failure from any job.
    pub fn record_failure(&self) -> u32 {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(Instant::now());
        state.last_failure_at = Some(Utc::now());
        state.consecutive_failures
    }

    /// Reset the counter after a successful acquisition.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.consecutive_failures > 0 {
            info!(
                previous_failures = state.consecutive_failures,
                "Acquisition succeeded, resetting backoff"
            );
        }
        state.consecutive_failures = 0;
    }
}
