//! Share session model.

use chrono::{DateTime, Utc};

/// A resolved share session. Fetched once at startup and immutable for the
/// life of the page. Never serialized to clients (it carries the passcode
/// hash).
#[derive(Debug, Clone)]
pub struct ShareSession {
    pub id: String,
    pub passcode_hash: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub show_name: Option<String>,
}
