//! Share session resolution.
//!
//! A share identifier resolves to a session record that gates everything
//! else: the session must exist, be active, and be unexpired before the
//! passcode is even prompted for.

use chrono::{TimeZone, Utc};

use crate::errors::AppError;
use crate::models::ShareSession;
use crate::store::{RecordStore, RemoteRecord};

/// Resolve a share identifier to a session. Success grants nothing beyond
/// the right to attempt the passcode.
pub async fn resolve_session(
    store: &dyn RecordStore,
    share_id: &str,
) -> Result<ShareSession, AppError> {
    let record = store
        .fetch_by_id(share_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Share {} not found", share_id)))?;

    let session = session_from_record(share_id, &record);

    if !session.is_active {
        return Err(AppError::Revoked(
            "This share has been revoked by the owner".to_string(),
        ));
    }

    if let Some(expires_at) = session.expires_at {
        if Utc::now() > expires_at {
            return Err(AppError::Expired("This share link has expired".to_string()));
        }
    }

    Ok(session)
}

fn session_from_record(share_id: &str, record: &RemoteRecord) -> ShareSession {
    // A share without a stored hash verifies no candidate; indistinguishable
    // from an ordinary mismatch.
    let passcode_hash = record.str_field("passcodeHash").unwrap_or_default().to_string();

    let expires_at = record
        .i64_field("expiresAt")
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    ShareSession {
        id: share_id.to_string(),
        passcode_hash,
        is_active: record.bool_field("isActive").unwrap_or(false),
        expires_at,
        show_name: record.str_field("showName").map(str::to_string),
    }
}
