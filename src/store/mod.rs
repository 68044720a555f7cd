//! Record store abstraction.
//!
//! The hosted record database is modelled as a schemaless record store with
//! optimistic-concurrency writes: every record carries an opaque change tag
//! that the store refreshes on each successful save, and a save supplying a
//! stale tag is rejected.

#[cfg(test)]
mod memory;
mod sqlite;

#[cfg(test)]
pub use memory::*;
pub use sqlite::*;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Record type for person rows.
pub const RECORD_TYPE_SHARED_USER: &str = "SharedUser";
/// Record type for share session records.
pub const RECORD_TYPE_SHARE: &str = "Share";
/// Record type for show configuration records.
pub const RECORD_TYPE_SHOW: &str = "Show";

/// A record as stored remotely: an opaque change tag plus a free-form field
/// map. Absent fields are defaulted by callers, never treated as errors.
#[derive(Debug, Clone)]
pub struct RemoteRecord {
    pub record_type: String,
    pub record_name: String,
    pub change_tag: String,
    pub fields: Map<String, Value>,
}

impl RemoteRecord {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_i64)
    }

    /// Booleans may arrive as JSON booleans or 0/1 numbers.
    pub fn bool_field(&self, name: &str) -> Option<bool> {
        match self.fields.get(name) {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::Number(n)) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }

    /// String-array field; non-string entries are skipped.
    pub fn string_list_field(&self, name: &str) -> Vec<String> {
        self.fields
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A version-checked write. `fields` is merged into the stored record.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub record_type: String,
    pub record_name: String,
    pub change_tag: String,
    pub fields: Map<String, Value>,
}

/// Result of a successful save: the freshly issued change tag.
#[derive(Debug, Clone)]
pub struct SavedRecord {
    pub record_name: String,
    pub change_tag: String,
}

/// Store failure taxonomy.
#[derive(Debug)]
pub enum StoreError {
    /// The record does not exist.
    NotFound(String),
    /// The supplied change tag is stale.
    VersionConflict { current_change_tag: String },
    /// The store rejected the caller's write credentials.
    AuthRequired,
    /// Network/service hiccup; safe to retry later.
    Transient(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(msg) => write!(f, "record not found: {}", msg),
            StoreError::VersionConflict { current_change_tag } => {
                write!(f, "stale change tag (current {})", current_change_tag)
            }
            StoreError::AuthRequired => write!(f, "store authentication required"),
            StoreError::Transient(msg) => write!(f, "transient store error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Record store database error: {:?}", err);
        StoreError::Transient(format!("database error: {}", err))
    }
}

/// The remote record store the sync core runs against.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch records by identifier. Missing identifiers are simply absent
    /// from the result, not errors.
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<RemoteRecord>, StoreError>;

    /// Equality query over one field of a record type.
    async fn query(
        &self,
        record_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<RemoteRecord>, StoreError>;

    /// Version-checked save. Merges `fields` into the record and issues a
    /// new change tag, or rejects the write with `VersionConflict`.
    async fn save(&self, request: SaveRequest) -> Result<SavedRecord, StoreError>;

    /// Convenience single-record fetch.
    async fn fetch_by_id(&self, id: &str) -> Result<Option<RemoteRecord>, StoreError> {
        let records = self.fetch_by_ids(&[id.to_string()]).await?;
        Ok(records.into_iter().next())
    }
}
