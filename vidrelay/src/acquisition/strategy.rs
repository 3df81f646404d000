//! Acquisition strategies and their ordering.
//!
//! A strategy is plain data: where its credential comes from, which format
//! selector to ask for, and how relaxed the client should be. The
//! coordinator walks the configured list in order, so reordering or adding
//! strategies is a configuration change.

use serde::{Deserialize, Serialize};

use super::backoff::BackoffConfig;
use super::browser::BrowserKind;
use crate::{Error, Result};

/// Where a strategy gets its cookies from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// The credential submitted with the job.
    Provided,
    /// The operator-uploaded default cookie file.
    StoredDefault,
    /// Cookies read from a local browser profile. `None` takes the first
    /// installed browser; the strategy is skipped if none matches.
    Browser(Option<BrowserKind>),
    /// No cookies.
    None,
}

/// One named acquisition configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub credential: CredentialSource,
    /// Format selector handed to the fetch engine.
    pub format_selector: String,
    #[serde(default)]
    pub geo_bypass: bool,
    #[serde(default)]
    pub geo_bypass_country: Option<String>,
    #[serde(default = "default_true")]
    pub rotate_user_agent: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl StrategyConfig {
    pub fn new(
        name: impl Into<String>,
        credential: CredentialSource,
        format_selector: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            credential,
            format_selector: format_selector.into(),
            geo_bypass: false,
            geo_bypass_country: None,
            rotate_user_agent: true,
            extra_args: Vec::new(),
        }
    }

    pub fn with_geo_bypass(mut self, country: impl Into<String>) -> Self {
        self.geo_bypass = true;
        self.geo_bypass_country = Some(country.into());
        self
    }
}

/// Preferred selector: mp4 up to 720p, degrading to anything playable.
pub const FORMAT_PREFERRED: &str =
    "best[ext=mp4][height<=720]/best[ext=mp4][height<=1080]/best[ext=mp4]/best[height<=720]/best";
/// Any mp4, or any format with video.
pub const FORMAT_RELAXED: &str = "best[ext=mp4]/best[vcodec!=none]/best";
/// Whatever the site serves.
pub const FORMAT_MINIMAL: &str = "best/worst";

/// The built-in strategy order.
pub fn default_strategies() -> Vec<StrategyConfig> {
    vec![
        StrategyConfig::new("provided_credential", CredentialSource::Provided, FORMAT_PREFERRED),
        StrategyConfig::new("browser_cookies", CredentialSource::Browser(None), FORMAT_PREFERRED),
        StrategyConfig::new("stored_credential", CredentialSource::StoredDefault, FORMAT_PREFERRED),
        StrategyConfig::new("relaxed", CredentialSource::None, FORMAT_RELAXED).with_geo_bypass("US"),
        StrategyConfig::new("minimal", CredentialSource::None, FORMAT_MINIMAL),
    ]
}

/// Acquisition policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Ordered strategy list.
    pub strategies: Vec<StrategyConfig>,
    /// How many passes over the strategy list a job may make.
    pub rounds: u32,
    pub backoff: BackoffConfig,
    /// Hard timeout for one fetch call.
    pub attempt_timeout_secs: u64,
    /// Cap on fetch calls per job.
    pub max_attempts: u32,
    /// Cap on wall time spent acquiring one job.
    pub max_elapsed_secs: u64,
    /// Extra time a fetch engine gets past its own timeout to kill its
    /// child and remove partial output.
    pub engine_grace_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            rounds: 1,
            backoff: BackoffConfig::default(),
            attempt_timeout_secs: 900,
            max_attempts: 8,
            max_elapsed_secs: 1_800,
            engine_grace_ms: 5_000,
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.strategies.is_empty() {
            return Err(Error::config("acquisition needs at least one strategy"));
        }
        let mut seen = std::collections::HashSet::new();
        for strategy in &self.strategies {
            if strategy.name.trim().is_empty() {
                return Err(Error::config("strategy names must not be empty"));
            }
            if strategy.format_selector.trim().is_empty() {
                return Err(Error::config(format!(
                    "strategy '{}' has an empty format selector",
                    strategy.name
                )));
            }
            if !seen.insert(strategy.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate strategy name '{}'",
                    strategy.name
                )));
            }
        }
        if self.rounds == 0 || self.max_attempts == 0 {
            return Err(Error::config("acquisition rounds and max_attempts must be positive"));
        }
        if self.attempt_timeout_secs == 0 || self.max_elapsed_secs == 0 {
            return Err(Error::config("acquisition timeouts must be positive"));
        }
        self.backoff.validate()
    }

    /// Reorder (and filter) strategies by name.
    ///
    /// Unknown names are an error; strategies not named are dropped.
    pub fn reorder(&mut self, names: &[&str]) -> Result<()> {
        let mut ordered = Vec::with_capacity(names.len());
        for name in names {
            let strategy = self
                .strategies
                .iter()
                .find(|s| s.name == *name)
                .ok_or_else(|| Error::config(format!("unknown strategy '{name}'")))?;
            ordered.push(strategy.clone());
        }
        self.strategies = ordered;
        Ok(())
    }
}
