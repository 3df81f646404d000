//! API error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 422 Unprocessable Entity.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::UnknownJob(_) => ApiError::not_found("Task not found"),
            Error::DuplicateId(id) => ApiError::conflict(format!("Task '{id}' already exists")),
            Error::InvalidTransition { from, to } => {
                ApiError::conflict(format!("Cannot transition from {from} to {to}"))
            }
            Error::Validation(msg) => ApiError::validation(msg),
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::IoPath { .. } | Error::Io(_) => {
                tracing::error!(error = %err, "IO error");
                ApiError::internal("IO error occurred")
            }
            _ => {
                tracing::error!(error = %err, "Unexpected error");
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
