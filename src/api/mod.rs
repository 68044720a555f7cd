//! HTTP API module.
//!
//! The presentation layer's event contract: thin handlers that forward edit
//! intents to the sync engine and serve model snapshots and status.

mod people;
mod share;

pub use people::*;
pub use share::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::sync::SyncEngine;
use crate::AppState;

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub model_rev: u64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, model_rev: u64) -> Self {
        Self {
            success: true,
            data,
            model_rev,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, crate::errors::AppErrorWithRev>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, model_rev: u64) -> ApiResult<T> {
    Ok(ApiResponse::new(data, model_rev))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: AppError, model_rev: u64) -> ApiResult<T> {
    Err(crate::errors::AppErrorWithRev {
        error: err,
        model_rev,
    })
}

/// Look up the engine for a share; data routes are gated on the passcode
/// round-trip having happened.
pub(crate) fn engine_for(
    state: &AppState,
    share_id: &str,
) -> Result<std::sync::Arc<SyncEngine>, AppError> {
    state
        .shares
        .get(share_id)
        .map(|entry| entry.value().clone())
        .ok_or(AppError::PasscodeRequired)
}
