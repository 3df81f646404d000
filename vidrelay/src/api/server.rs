//! API server setup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::acquisition::CookieStore;
use crate::api::routes;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::services::JobService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
    /// Request body size limit in bytes.
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            body_limit: 2 * 1024 * 1024,
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub job_service: Arc<JobService>,
    pub cookies: CookieStore,
    pub logging_config: Option<Arc<LoggingConfig>>,
}

impl AppState {
    pub fn new(job_service: Arc<JobService>, cookies: CookieStore) -> Self {
        Self {
            start_time: Instant::now(),
            job_service,
            cookies,
            logging_config: None,
        }
    }

    pub fn with_logging(mut self, logging_config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(logging_config);
        self
    }
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Routes plus CORS, body limit and request tracing.
    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.body_limit));

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    // Health probes are polled constantly; keep them out of the log.
                    if req.uri().path() == "/health" {
                        Span::none()
                    } else {
                        tracing::info_span!(
                            "http",
                            method = %req.method(),
                            path = %req.uri().path(),
                        )
                    }
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        tracing::info!(
                            status = res.status().as_u16(),
                            latency_ms = latency.as_millis() as u64,
                            "Request finished"
                        );
                    },
                ),
        )
    }

    /// Serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid bind address: {e}")))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Other(format!("Failed to bind {addr}: {e}")))?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| Error::Other(format!("Server error: {e}")))?;

        Ok(())
    }
}
