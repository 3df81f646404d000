//! API route modules.

pub mod cookies;
pub mod health;
pub mod jobs;
pub mod logging;

use axum::Router;
use axum::routing::get;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", jobs::router().merge(cookies::router()))
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .route("/", get(health::service_info))
        .with_state(state)
}
