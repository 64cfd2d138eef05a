//! [`AppError`]: maps a [`ServiceError`] category onto an HTTP status code
//! and a `{error, message}` JSON body, the way the teacher's `serve_cmd`
//! maps its own ad-hoc error type onto a status/body pair.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use ember_core::error::{ErrorCategory, ServiceError};

pub struct AppError(pub ServiceError);

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self(ServiceError::not_found(message))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self(ServiceError::validation(message))
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self(ServiceError::unauthenticated(message))
    }

    pub fn ownership(message: impl Into<String>) -> Self {
        Self(ServiceError::ownership(message))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self(ServiceError::conflict(message))
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self(ServiceError::internal(err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorCategory::Ownership => StatusCode::FORBIDDEN,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::Transient => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.category);
        let body = serde_json::json!({ "error": format!("{:?}", self.0.category), "message": self.0.message });
        (status, Json(body)).into_response()
    }
}
