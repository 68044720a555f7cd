//! Error handling module for the CrewComms backend.
//!
//! Provides centralized error types with mapping to HTTP status codes and
//! response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Error codes as constants to avoid stringly-typed errors.
#[allow(dead_code)]
pub mod codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const SHARE_REVOKED: &str = "SHARE_REVOKED";
    pub const SHARE_EXPIRED: &str = "SHARE_EXPIRED";
    pub const PASSCODE_INCORRECT: &str = "PASSCODE_INCORRECT";
    pub const PASSCODE_REQUIRED: &str = "PASSCODE_REQUIRED";
    pub const AUTHORIZATION_REQUIRED: &str = "AUTHORIZATION_REQUIRED";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const STORE_ERROR: &str = "STORE_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Share or record does not exist
    NotFound(String),
    /// Share deactivated by its owner
    Revoked(String),
    /// Share expiry timestamp is in the past
    Expired(String),
    /// Wrong passcode; the caller may re-prompt
    PasscodeIncorrect,
    /// Data route hit before the passcode round-trip
    PasscodeRequired,
    /// Write attempted without write authorization
    AuthRequired(String),
    /// Bad edit payload
    Validation(String),
    /// Remote record store failure
    Store(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Revoked(_) => StatusCode::GONE,
            AppError::Expired(_) => StatusCode::GONE,
            AppError::PasscodeIncorrect => StatusCode::UNAUTHORIZED,
            AppError::PasscodeRequired => StatusCode::UNAUTHORIZED,
            AppError::AuthRequired(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Revoked(_) => codes::SHARE_REVOKED,
            AppError::Expired(_) => codes::SHARE_EXPIRED,
            AppError::PasscodeIncorrect => codes::PASSCODE_INCORRECT,
            AppError::PasscodeRequired => codes::PASSCODE_REQUIRED,
            AppError::AuthRequired(_) => codes::AUTHORIZATION_REQUIRED,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Store(_) => codes::STORE_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::NotFound(msg) => msg.clone(),
            AppError::Revoked(msg) => msg.clone(),
            AppError::Expired(msg) => msg.clone(),
            AppError::PasscodeIncorrect => "Incorrect passcode".to_string(),
            AppError::PasscodeRequired => "Passcode required".to_string(),
            AppError::AuthRequired(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Store(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => AppError::NotFound(format!("Record not found: {}", msg)),
            StoreError::AuthRequired => {
                AppError::AuthRequired("Store authentication required".to_string())
            }
            other => {
                tracing::error!("Record store error: {}", other);
                AppError::Store(format!("Record store error: {}", other))
            }
        }
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
    pub model_rev: u64,
}

impl ErrorResponse {
    pub fn new(error: &AppError, model_rev: u64) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
            },
            model_rev,
        }
    }
}

/// Wrapper type for errors that carry model-revision context.
pub struct AppErrorWithRev {
    pub error: AppError,
    pub model_rev: u64,
}

impl IntoResponse for AppErrorWithRev {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = ErrorResponse::new(&self.error, self.model_rev);
        (status, Json(body)).into_response()
    }
}
