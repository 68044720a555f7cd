//! Edit-intent endpoints.
//!
//! Handlers return as soon as the engine has applied the edit optimistically;
//! persistence happens behind the debounce.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use super::{engine_for, error, success, ApiResult};
use crate::errors::AppError;
use crate::sync::PersonField;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEditRequest {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelEditRequest {
    pub channel: String,
}

/// PUT /api/shares/{id}/people/{record}/fields - Edit one field.
pub async fn edit_person_field(
    State(state): State<AppState>,
    Path((share_id, record_name)): Path<(String, String)>,
    Json(request): Json<FieldEditRequest>,
) -> ApiResult<()> {
    let engine = match engine_for(&state, &share_id) {
        Ok(engine) => engine,
        Err(e) => return error(e, 0),
    };

    let Some(field) = PersonField::from_wire(&request.field) else {
        return error(
            AppError::Validation(format!("Unknown or read-only field: {}", request.field)),
            engine.model_rev(),
        );
    };

    match engine.apply_edit(&record_name, field, &request.value).await {
        Ok(()) => success((), engine.model_rev()),
        Err(e) => error(e, engine.model_rev()),
    }
}

/// PUT /api/shares/{id}/people/{record}/channels/{index} - Assign a channel
/// slot (empty channel clears it).
pub async fn edit_person_channel(
    State(state): State<AppState>,
    Path((share_id, record_name, index)): Path<(String, String, usize)>,
    Json(request): Json<ChannelEditRequest>,
) -> ApiResult<()> {
    let engine = match engine_for(&state, &share_id) {
        Ok(engine) => engine,
        Err(e) => return error(e, 0),
    };

    match engine
        .apply_channel_edit(&record_name, index, &request.channel)
        .await
    {
        Ok(()) => success((), engine.model_rev()),
        Err(e) => error(e, engine.model_rev()),
    }
}
