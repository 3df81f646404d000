//! Fetch-engine error classification.
//!
//! Fetch tools only report failures as free text, so the decision between
//! "retry with another strategy" and "stop now" is made by matching known
//! phrases. All of that matching lives in the ordered [`RULES`] table; the
//! coordinator only ever sees the resulting [`Classification`].

use serde::Serialize;

use super::engine::FetchError;

/// Whether an attempt failure may succeed on a different strategy or later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    Retryable,
    Fatal,
}

/// A classified failure with a caller-facing reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub class: FailureClass,
    pub reason: String,
}

impl Classification {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Retryable,
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Fatal,
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class == FailureClass::Fatal
    }
}

#[derive(Debug, Clone, Copy)]
enum Verdict {
    Retryable,
    Fatal,
    /// Fatal without a credential, retryable with one.
    NeedsCredential,
}

struct Rule {
    needles: &'static [&'static str],
    verdict: Verdict,
    reason: &'static str,
}

/// Ordered lookup table; the first rule with a matching needle wins.
///
/// Needles are lowercase and matched against the lowercased error text.
const RULES: &[Rule] = &[
    // Region locks read like "video unavailable" but can clear on geo bypass.
    Rule {
        needles: &["not available in your country", "blocked it in your country"],
        verdict: Verdict::Retryable,
        reason: "Video is region-locked",
    },
    Rule {
        needles: &["sign in to confirm your age", "age-restricted", "inappropriate for some users"],
        verdict: Verdict::NeedsCredential,
        reason: "Video is age-restricted. Upload cookies from a logged-in session to access it.",
    },
    Rule {
        needles: &["private video"],
        verdict: Verdict::Fatal,
        reason: "This is a private video. You need cookies from a logged-in session.",
    },
    Rule {
        needles: &["removed by the user", "has been removed", "account associated with this video has been terminated"],
        verdict: Verdict::Fatal,
        reason: "Video has been removed",
    },
    Rule {
        needles: &["members-only", "join this channel", "requires payment", "premium members"],
        verdict: Verdict::Fatal,
        reason: "Video is only available to paying members",
    },
    Rule {
        needles: &["video unavailable"],
        verdict: Verdict::Fatal,
        reason: "Video is unavailable. It may be region-locked or removed.",
    },
    Rule {
        needles: &["http error 404"],
        verdict: Verdict::Fatal,
        reason: "Video not found. It may have been deleted, made private, or the URL is incorrect.",
    },
    Rule {
        needles: &["sign in to confirm", "not a bot"],
        verdict: Verdict::Retryable,
        reason: "Upstream is blocking automated access. Try uploading cookies or try again later.",
    },
    Rule {
        needles: &["http error 429", "too many requests", "rate limit"],
        verdict: Verdict::Retryable,
        reason: "Rate limited by upstream",
    },
    Rule {
        needles: &["http error 403"],
        verdict: Verdict::Retryable,
        reason: "Access forbidden. Video may be region-locked or require authentication.",
    },
    Rule {
        needles: &["requested format is not available"],
        verdict: Verdict::Retryable,
        reason: "Requested format is not available",
    },
    Rule {
        needles: &["timed out", "timeout", "connection reset", "temporary failure", "unable to download webpage", "incomplete read"],
        verdict: Verdict::Retryable,
        reason: "Transient network failure",
    },
];

/// Classify raw fetch-engine error text.
///
/// Unrecognized text is retryable: an unknown failure should cost another
/// strategy, not the whole job.
pub fn classify(error_text: &str, had_credential: bool) -> Classification {
    let lowered = error_text.to_lowercase();

    for rule in RULES {
        if rule.needles.iter().any(|needle| lowered.contains(needle)) {
            let class = match rule.verdict {
                Verdict::Retryable => FailureClass::Retryable,
                Verdict::Fatal => FailureClass::Fatal,
                Verdict::NeedsCredential if had_credential => FailureClass::Retryable,
                Verdict::NeedsCredential => FailureClass::Fatal,
            };
            return Classification {
                class,
                reason: rule.reason.to_string(),
            };
        }
    }

    Classification::retryable(summarize(error_text))
}

/// Classify a structured engine error.
pub fn classify_fetch_error(error: &FetchError, had_credential: bool) -> Classification {
    if error.timed_out {
        return Classification::retryable(format!("Fetch timed out: {}", summarize(&error.message)));
    }
    classify(&error.message, had_credential)
}

/// Last meaningful line of tool output, bounded in length.
fn summarize(text: &str) -> String {
    const MAX: usize = 300;

    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error");

    if line.len() <= MAX {
        return line.to_string();
    }
    let mut end = MAX;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}
