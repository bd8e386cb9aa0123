//! API error type and the client-facing error envelope

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;

use crate::auth::{PasswordError, TokenError};
use crate::store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service unavailable")]
    ServiceUnavailable { retry_after: Option<Duration> },
    #[error("Authentication required")]
    Unauthorized,
    /// Wrong identifier or wrong password; the two are never distinguished
    #[error("Invalid credentials")]
    CredentialInvalid,
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found")]
    NotFound,
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Uniform error body: `{"error": "...", "code": 401}`
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let body = Json(json!({
        "error": message,
        "code": status.as_u16()
    }));
    (status, body).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::ServiceUnavailable { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable, please retry",
            ),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required"),
            ApiError::CredentialInvalid => (StatusCode::UNAUTHORIZED, "Invalid credentials"),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.as_str()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found"),
            ApiError::Database(detail) | ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed with internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let mut response = error_response(status, message);

        if let ApiError::ServiceUnavailable {
            retry_after: Some(retry_after),
        } = self
        {
            // Round up so clients never retry before the cool-down ends
            let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds.max(1)));
        }

        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => {
                ApiError::Conflict("An account with these details already exists".to_string())
            }
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Corrupt(detail) => ApiError::Internal(detail),
            StoreError::Database(e) => ApiError::Database(e.to_string()),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(detail) => ApiError::Internal(detail),
            TokenError::InvalidSignature | TokenError::Expired | TokenError::Malformed => {
                ApiError::Unauthorized
            }
        }
    }
}
