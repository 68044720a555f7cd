//! Share lifecycle endpoints: resolution, passcode, sign-in, snapshot,
//! status.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{engine_for, error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{PersonRecord, ShareSession, ShowConfig};
use crate::sync::{SharePhase, SyncEngine, SyncSettings, SyncStatus};
use crate::{auth, loader, session, AppState};

/// What the passcode screen needs to render.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareInfoResponse {
    pub show_name: String,
}

#[derive(Debug, Deserialize)]
pub struct PasscodeRequest {
    pub passcode: String,
}

/// Full model snapshot for rendering the editor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub show: ShowConfig,
    pub people: Vec<PersonRecord>,
    pub sync_status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub phase: SharePhase,
    pub sync_status: SyncStatus,
    pub authorization_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_ms: Option<i64>,
}

/// GET /api/shares/{id} - Resolve a share link.
pub async fn resolve_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
) -> ApiResult<ShareInfoResponse> {
    match session::resolve_session(state.store.as_ref(), &share_id).await {
        Ok(session) => success(
            ShareInfoResponse {
                show_name: session.show_name.unwrap_or_else(|| "Shared Show".to_string()),
            },
            0,
        ),
        Err(e) => error(e, 0),
    }
}

/// POST /api/shares/{id}/passcode - Verify the passcode and open the share.
pub async fn verify_share_passcode(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
    Json(request): Json<PasscodeRequest>,
) -> ApiResult<SnapshotResponse> {
    match open_share(&state, &share_id, &request.passcode).await {
        Ok(engine) => {
            let snapshot = snapshot_of(&engine).await;
            success(snapshot, engine.model_rev())
        }
        Err(e) => error(e, 0),
    }
}

/// POST /api/shares/{id}/signin - Record a completed platform sign-in.
pub async fn signin(State(state): State<AppState>, Path(share_id): Path<String>) -> ApiResult<()> {
    match engine_for(&state, &share_id) {
        Ok(engine) => {
            engine.mark_signed_in().await;
            success((), engine.model_rev())
        }
        Err(e) => error(e, 0),
    }
}

/// GET /api/shares/{id}/snapshot - Full model snapshot.
pub async fn share_snapshot(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
) -> ApiResult<SnapshotResponse> {
    match engine_for(&state, &share_id) {
        Ok(engine) => {
            let snapshot = snapshot_of(&engine).await;
            success(snapshot, engine.model_rev())
        }
        Err(e) => error(e, 0),
    }
}

/// GET /api/shares/{id}/status - Phase, sync status, and the (consumed)
/// authorization-required signal.
pub async fn share_status(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
) -> ApiResult<StatusResponse> {
    match engine_for(&state, &share_id) {
        Ok(engine) => {
            let status = StatusResponse {
                phase: engine.phase(),
                sync_status: engine.sync_status(),
                authorization_required: engine.take_auth_prompt().await,
                last_updated_ms: engine.last_updated().await.map(|t| t.timestamp_millis()),
            };
            success(status, engine.model_rev())
        }
        Err(_) => success(
            StatusResponse {
                phase: SharePhase::NeedsPasscode,
                sync_status: SyncStatus::Synced,
                authorization_required: false,
                last_updated_ms: None,
            },
            0,
        ),
    }
}

/// Resolve, verify, and return the share's engine, creating it (and its
/// poller) on the first successful unlock.
async fn open_share(
    state: &AppState,
    share_id: &str,
    passcode: &str,
) -> Result<Arc<SyncEngine>, AppError> {
    let session = session::resolve_session(state.store.as_ref(), share_id).await?;

    if !auth::verify_passcode(passcode, &session.passcode_hash) {
        return Err(AppError::PasscodeIncorrect);
    }

    if let Some(engine) = state.shares.get(share_id) {
        return Ok(engine.value().clone());
    }

    let engine = create_engine(state, &session).await?;
    // A concurrent unlock may have won the race; keep whichever landed first
    let engine = state
        .shares
        .entry(share_id.to_string())
        .or_insert(engine)
        .value()
        .clone();
    Ok(engine)
}

async fn create_engine(
    state: &AppState,
    session: &ShareSession,
) -> Result<Arc<SyncEngine>, AppError> {
    let show = loader::load_show(state.store.as_ref(), &session.id, session).await?;
    let people = loader::load_people(state.store.as_ref(), &session.id).await?;
    tracing::info!(
        "Opened share {} ({} people, {} channels)",
        session.id,
        people.len(),
        show.channels.len()
    );

    let settings = SyncSettings {
        debounce: state.config.debounce,
        poll_interval: state.config.poll_interval,
        error_cooldown: state.config.error_cooldown,
        require_signin: state.config.require_signin,
    };

    let engine = SyncEngine::new(
        state.store.clone(),
        session.id.clone(),
        show,
        people,
        settings,
    );
    engine.spawn_poller();
    Ok(engine)
}

async fn snapshot_of(engine: &Arc<SyncEngine>) -> SnapshotResponse {
    SnapshotResponse {
        show: engine.show().clone(),
        people: engine.people().await,
        sync_status: engine.sync_status(),
        last_updated_ms: engine.last_updated().await.map(|t| t.timestamp_millis()),
    }
}
