//! Log filter and log file routes.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{LoggingConfigResponse, UpdateLogFilterRequest};
use crate::api::server::AppState;
use crate::logging::LoggingConfig;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_logging_config).put(update_logging_config))
}

fn logging_config(state: &AppState) -> ApiResult<&Arc<LoggingConfig>> {
    state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))
}

async fn describe(config: &LoggingConfig) -> ApiResult<LoggingConfigResponse> {
    let files = config
        .list_files()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to list log files: {e}")))?;
    Ok(LoggingConfigResponse {
        filter: config.get_filter(),
        files,
    })
}

async fn get_logging_config(State(state): State<AppState>) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state)?;
    Ok(Json(describe(config).await?))
}

async fn update_logging_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = logging_config(&state)?;
    config
        .set_filter(&request.filter)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(describe(config).await?))
}
