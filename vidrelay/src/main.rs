use anyhow::Context;
use tracing::{info, warn};

use vidrelay::api::{ApiServer, AppState};
use vidrelay::config::AppConfig;
use vidrelay::logging;
use vidrelay::services::ServiceContainer;
use vidrelay::utils::http_client::install_rustls_provider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    install_rustls_provider();

    let config = AppConfig::load().await.context("loading configuration")?;
    config
        .ensure_dirs()
        .await
        .context("creating data directories")?;

    let (logging_config, _guard) =
        logging::init_logging(&config.paths.log_dir).context("initializing logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        work_dir = %config.paths.work_dir.display(),
        strategies = config.acquisition.strategies.len(),
        tiers = config.transcode.tiers.len(),
        "Starting vidrelay"
    );

    let server_config = config.server.clone();
    let container = ServiceContainer::new(config).context("wiring services")?;
    let cancel_token = container.cancellation_token();
    logging_config.start_retention_cleanup(cancel_token.clone());

    let state = AppState::new(container.job_service.clone(), container.cookies.clone())
        .with_logging(logging_config.clone());
    let server = ApiServer::new(server_config, state, cancel_token.clone());

    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                signal_token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    let served = server.run().await;
    container.shutdown().await;
    served.context("running API server")?;

    info!("vidrelay stopped");
    Ok(())
}
