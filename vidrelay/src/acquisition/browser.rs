//! Local browsers whose cookie stores yt-dlp can read.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A browser yt-dlp can pull cookies from, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserKind {
    Chrome,
    Firefox,
    Edge,
    Safari,
    Opera,
}

impl BrowserKind {
    pub const ALL: [BrowserKind; 5] = [
        BrowserKind::Chrome,
        BrowserKind::Firefox,
        BrowserKind::Edge,
        BrowserKind::Safari,
        BrowserKind::Opera,
    ];

    /// Name accepted by `--cookies-from-browser`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
            Self::Edge => "edge",
            Self::Safari => "safari",
            Self::Opera => "opera",
        }
    }

    fn executables(&self) -> &'static [&'static str] {
        match self {
            Self::Chrome => &["chrome", "google-chrome", "google-chrome-stable", "chromium"],
            Self::Firefox => &["firefox"],
            Self::Edge => &["msedge", "microsoft-edge"],
            Self::Safari => &["safari"],
            Self::Opera => &["opera"],
        }
    }
}

impl std::fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browsers found on `PATH`, in preference order.
pub fn detect_installed() -> Vec<BrowserKind> {
    let found: Vec<_> = BrowserKind::ALL
        .into_iter()
        .filter(|browser| {
            browser
                .executables()
                .iter()
                .any(|exe| which::which(exe).is_ok())
        })
        .collect();
    debug!(?found, "Detected browsers for cookie extraction");
    found
}

/// Pick the browser a strategy should read cookies from.
///
/// `wanted = None` takes the first installed browser.
pub fn choose(wanted: Option<BrowserKind>, installed: &[BrowserKind]) -> Option<BrowserKind> {
    match wanted {
        Some(browser) => installed.contains(&browser).then_some(browser),
        None => BrowserKind::ALL
            .into_iter()
            .find(|browser| installed.contains(browser)),
    }
}
