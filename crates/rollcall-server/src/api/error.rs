//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rollcall_core::{RoleKind, RollcallError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    #[error("Bad Request: {message}")]
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    #[error("Not Found: {message}")]
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - A role is already running.
    #[error("Conflict: {message}")]
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// The role holding the radio.
        active_role: Option<RoleKind>,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    #[error("Internal Error: {message}")]
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details.
        details: Option<String>,
    },

    /// 503 Service Unavailable - The radio is missing or powered off.
    #[error("Service Unavailable: {message}")]
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "ALREADY_RUNNING",
    "message": "A collector role is already running",
    "details": { "active_role": "collector" }
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "RADIO_UNAVAILABLE").
    #[schema(example = "ALREADY_RUNNING")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "A collector role is already running")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest { error_code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::NotFound { error_code, message } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::Conflict {
                error_code,
                message,
                active_role,
            } => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: Some(serde_json::json!({ "active_role": active_role })),
                },
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: details.map(|d| serde_json::json!(d)),
                    },
                )
            }

            Self::ServiceUnavailable {
                error_code,
                message,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

/// Convert from rollcall_core errors.
impl From<RollcallError> for ApiError {
    fn from(err: RollcallError) -> Self {
        let error_code = err.error_code().to_string();
        let message = err.to_string();

        match &err {
            RollcallError::AlreadyRunning { active } => Self::Conflict {
                error_code,
                message,
                active_role: Some(*active),
            },
            RollcallError::Encoding(_) => Self::BadRequest {
                error_code,
                message,
            },
            RollcallError::RadioUnavailable => Self::ServiceUnavailable {
                error_code,
                message,
            },
            RollcallError::ConfigNotFound(_) => Self::NotFound {
                error_code,
                message,
            },
            RollcallError::OperationFailed { operation, .. } => Self::InternalError {
                error_code,
                message,
                details: Some(format!("radio operation: {operation}")),
            },
            RollcallError::ConfigParseError(_)
            | RollcallError::ConfigValidationError(_)
            | RollcallError::PersistenceError(_)
            | RollcallError::IoError(_) => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{EncodingError, RadioOperation};

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::BadRequest {
            error_code: "test_error".to_string(),
            message: "Test message".to_string(),
        };
        assert!(err.to_string().contains("Bad Request"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "test_error".to_string(),
            message: "Test message".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test_error"));
    }

    #[test]
    fn test_already_running_is_conflict() {
        let err = ApiError::from(RollcallError::AlreadyRunning {
            active: RoleKind::Collector,
        });
        assert!(matches!(
            err,
            ApiError::Conflict {
                active_role: Some(RoleKind::Collector),
                ..
            }
        ));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_status_codes_follow_core_mapping() {
        let cases = [
            RollcallError::RadioUnavailable,
            RollcallError::Encoding(EncodingError::EmptyToken { field: "identity" }),
            RollcallError::OperationFailed {
                operation: RadioOperation::StartScanning,
                reason: "code 2".into(),
            },
        ];
        for err in cases {
            let expected = err.http_status_code();
            let status = ApiError::from(err).into_response().status();
            assert_eq!(status.as_u16(), expected);
        }
    }
}
