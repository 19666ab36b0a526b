#![allow(dead_code)]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::error::OcppError;

/// API error types that can be returned from handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Error response that gets serialized to JSON
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::ValidationError(_) => "ValidationError",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::Forbidden => "Forbidden",
            ApiError::Conflict(_) => "Conflict",
            ApiError::InternalError(_) => "InternalServerError",
            ApiError::ServiceUnavailable(_) => "ServiceUnavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        let detail = match &self {
            ApiError::InternalError(_) => {
                tracing::error!(error = %self, "API error occurred");
                None
            }
            ApiError::ServiceUnavailable(_) => {
                tracing::warn!(error = %self, "service unavailable");
                Some(self.to_string())
            }
            _ => {
                tracing::debug!(error = %self, "client error");
                Some(self.to_string())
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            detail,
        };

        (status, Json(error_response)).into_response()
    }
}

// Conversion from common error types

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::InternalError(error.to_string())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(errors.to_string())
    }
}

impl From<OcppError> for ApiError {
    fn from(error: OcppError) -> Self {
        match error {
            OcppError::StationNotFound(id) => ApiError::NotFound(format!("station '{id}' not found")),
            OcppError::StationDisconnected(id) => {
                ApiError::Conflict(format!("station '{id}' is not connected"))
            }
            OcppError::ValidationError(msg) => ApiError::ValidationError(msg),
            OcppError::Rejected(msg) => ApiError::BadRequest(msg),
            OcppError::CallTimeout | OcppError::Cancelled => {
                ApiError::ServiceUnavailable(error.to_string())
            }
            OcppError::TransportFailure(_)
            | OcppError::CallError { .. }
            | OcppError::ProtocolViolation(_) => ApiError::InternalError(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::InternalError("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_types() {
        assert_eq!(ApiError::NotFound("test".to_string()).error_type(), "NotFound");
        assert_eq!(ApiError::BadRequest("test".to_string()).error_type(), "BadRequest");
        assert_eq!(ApiError::Unauthorized.error_type(), "Unauthorized");
    }

    #[test]
    fn station_not_found_maps_to_404() {
        let api_err: ApiError = OcppError::StationNotFound("PY-SIM-0001".to_string()).into();
        assert_eq!(api_err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn station_disconnected_maps_to_409() {
        let api_err: ApiError = OcppError::StationDisconnected("PY-SIM-0001".to_string()).into();
        assert_eq!(api_err.status_code(), StatusCode::CONFLICT);
    }
}
