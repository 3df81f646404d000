//! Health and service info routes.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::models::{HealthResponse, ServiceInfo};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        message: "Video relay API is running".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_jobs: state.job_service.active_jobs(),
    })
}

pub async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: "Video relay API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
