use std::{sync::OnceLock, time::Duration};

use tracing::{debug, warn};

/// Install the aws-lc-rs rustls provider once per process.
///
/// reqwest is built without a bundled provider, so this must run before the
/// first client is constructed.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the `reqwest::Client` used for uploads.
pub fn build_client(request_timeout: Duration) -> reqwest::Client {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30));

    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }

    builder.build().unwrap_or_else(|error| {
        warn!(error = %error, "Failed to create configured HTTP client; falling back to reqwest defaults");
        reqwest::Client::new()
    })
}
