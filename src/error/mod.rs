//! Centralized API error handling
//!
//! Every HTTP-visible failure funnels into [`ApiError`], which maps onto a
//! status code and the flat `{ error, message, duplicate }` JSON body that
//! advertiser integrations parse.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::store::StoreError;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Postback timestamp expired (older than {max_age_minutes} minutes)")]
    PostbackExpired { max_age_minutes: i64 },

    #[error("Postback timestamp is in the future")]
    InvalidTimestamp,

    #[error("This request has already been processed")]
    DuplicateNonce,

    #[error("{0}")]
    DuplicateConversion(String),

    #[error("Click is older than {window_days} day attribution window")]
    AttributionExpired { window_days: i32 },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub duplicate: bool,
}

impl ApiError {
    /// Get the machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::TooManyRequests => "TOO_MANY_REQUESTS",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::PostbackExpired { .. } => "POSTBACK_EXPIRED",
            ApiError::InvalidTimestamp => "INVALID_TIMESTAMP",
            ApiError::DuplicateNonce => "DUPLICATE_NONCE",
            ApiError::DuplicateConversion(_) => "DUPLICATE_CONVERSION",
            ApiError::AttributionExpired { .. } => "ATTRIBUTION_EXPIRED",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_)
            | ApiError::ValidationError(_)
            | ApiError::PostbackExpired { .. }
            | ApiError::InvalidTimestamp
            | ApiError::AttributionExpired { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::DuplicateNonce | ApiError::DuplicateConversion(_) => StatusCode::CONFLICT,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the rejection is a replay of something already seen
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            ApiError::DuplicateNonce | ApiError::DuplicateConversion(_)
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        // Log server errors
        if status.is_server_error() {
            tracing::error!(error = %message, code = %error_code, "Server error occurred");
        } else {
            tracing::debug!(error = %message, code = %error_code, "Client error occurred");
        }

        let body = ErrorResponse {
            error: error_code.to_string(),
            duplicate: self.is_duplicate(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

// Convenience conversions from common error types

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::UniqueViolation(what) => ApiError::DuplicateConversion(format!(
                "Conversion already recorded ({})",
                what
            )),
            StoreError::InvalidTransition(msg) => ApiError::BadRequest(msg),
            StoreError::Database(msg) => ApiError::DatabaseError(msg),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::ServiceUnavailable(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError::PostbackExpired { max_age_minutes: 60 }.error_code(),
            "POSTBACK_EXPIRED"
        );
        assert_eq!(ApiError::InvalidTimestamp.error_code(), "INVALID_TIMESTAMP");
        assert_eq!(ApiError::DuplicateNonce.error_code(), "DUPLICATE_NONCE");
        assert_eq!(
            ApiError::DuplicateConversion("x".to_string()).error_code(),
            "DUPLICATE_CONVERSION"
        );
        assert_eq!(
            ApiError::AttributionExpired { window_days: 7 }.error_code(),
            "ATTRIBUTION_EXPIRED"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::DuplicateNonce.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::AttributionExpired { window_days: 30 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::TooManyRequests.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::DatabaseError("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_duplicate_flag() {
        assert!(ApiError::DuplicateConversion("x".to_string()).is_duplicate());
        assert!(!ApiError::InvalidTimestamp.is_duplicate());
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let err: ApiError = StoreError::UniqueViolation("external_conversion_id".into()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
