//! Default cookie file management routes.

use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::{get, post},
};

use crate::Error;
use crate::acquisition::CookieStatus;
use crate::acquisition::credentials::decode_upload;
use crate::api::error::{ApiError, ApiResult};
use crate::api::models::CookieUploadResponse;
use crate::api::server::AppState;

/// Multipart field carrying the cookies.txt upload.
const FILE_FIELD: &str = "file";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload-cookies", post(upload_cookies))
        .route("/test-cookies", get(test_cookies))
}

/// Replace the stored cookie file with the uploaded `file` field.
async fn upload_cookies(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<CookieUploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        if !field.file_name().is_some_and(|name| name.ends_with(".txt")) {
            return Err(ApiError::bad_request("File must be a .txt file"));
        }

        let body = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
        if body.is_empty() {
            return Err(ApiError::bad_request("Cookie file is empty"));
        }

        let text = decode_upload(&body);
        let cookie_count = state.cookies.save(&text).await.map_err(|e| match e {
            Error::Validation(msg) => ApiError::bad_request(msg),
            other => ApiError::from(other),
        })?;

        return Ok(Json(CookieUploadResponse {
            message: "Cookies uploaded successfully".to_string(),
            path: state.cookies.path().display().to_string(),
            cookie_count,
        }));
    }

    Err(ApiError::bad_request(format!("Missing '{FILE_FIELD}' field")))
}

async fn test_cookies(State(state): State<AppState>) -> Json<CookieStatus> {
    Json(state.cookies.inspect().await)
}
