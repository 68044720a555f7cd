//! In-memory record store used by tests and local demos.
//!
//! Mirrors the optimistic-concurrency semantics of the real store and adds
//! failure-injection knobs so engine behavior under conflicts and outages is
//! testable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::{RecordStore, RemoteRecord, SaveRequest, SavedRecord, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, RemoteRecord>>,
    fail_saves: Mutex<VecDeque<StoreError>>,
    pub save_calls: AtomicU64,
    pub query_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record with a fresh change tag.
    pub async fn insert(
        &self,
        record_type: &str,
        record_name: &str,
        fields: Map<String, Value>,
    ) -> SavedRecord {
        let change_tag = uuid::Uuid::new_v4().to_string();
        self.records.lock().await.insert(
            record_name.to_string(),
            RemoteRecord {
                record_type: record_type.to_string(),
                record_name: record_name.to_string(),
                change_tag: change_tag.clone(),
                fields,
            },
        );
        SavedRecord {
            record_name: record_name.to_string(),
            change_tag,
        }
    }

    /// Server-side mutation: set one field and bump the change tag, as a
    /// concurrent writer would. Returns the new tag.
    pub async fn put_field(&self, record_name: &str, field: &str, value: Value) -> String {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(record_name)
            .unwrap_or_else(|| panic!("no record {}", record_name));
        record.fields.insert(field.to_string(), value);
        record.change_tag = uuid::Uuid::new_v4().to_string();
        record.change_tag.clone()
    }

    pub async fn record(&self, record_name: &str) -> Option<RemoteRecord> {
        self.records.lock().await.get(record_name).cloned()
    }

    /// Queue an error for the next save call(s); consumed in order.
    pub async fn fail_next_save(&self, err: StoreError) {
        self.fail_saves.lock().await.push_back(err);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<RemoteRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn query(
        &self,
        record_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<RemoteRecord>, StoreError> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.record_type == record_type && r.str_field(field) == Some(value))
            .cloned()
            .collect())
    }

    async fn save(&self, request: SaveRequest) -> Result<SavedRecord, StoreError> {
        self.save_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(err) = self.fail_saves.lock().await.pop_front() {
            return Err(err);
        }

        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&request.record_name)
            .ok_or_else(|| StoreError::NotFound(request.record_name.clone()))?;

        if record.change_tag != request.change_tag {
            return Err(StoreError::VersionConflict {
                current_change_tag: record.change_tag.clone(),
            });
        }

        record.fields.extend(request.fields);
        record.change_tag = uuid::Uuid::new_v4().to_string();

        Ok(SavedRecord {
            record_name: request.record_name,
            change_tag: record.change_tag.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RECORD_TYPE_SHARED_USER;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_enforces_change_tag() {
        let store = MemoryStore::new();
        let seeded = store
            .insert(
                RECORD_TYPE_SHARED_USER,
                "rec-1",
                [("notes".to_string(), json!("old"))].into_iter().collect(),
            )
            .await;

        let saved = store
            .save(SaveRequest {
                record_type: RECORD_TYPE_SHARED_USER.to_string(),
                record_name: "rec-1".to_string(),
                change_tag: seeded.change_tag.clone(),
                fields: [("notes".to_string(), json!("new"))].into_iter().collect(),
            })
            .await
            .unwrap();

        let err = store
            .save(SaveRequest {
                record_type: RECORD_TYPE_SHARED_USER.to_string(),
                record_name: "rec-1".to_string(),
                change_tag: seeded.change_tag,
                fields: Map::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::VersionConflict { .. }));
        assert_eq!(
            store.record("rec-1").await.unwrap().change_tag,
            saved.change_tag
        );
        assert_eq!(store.save_calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_in_order() {
        let store = MemoryStore::new();
        let seeded = store.insert(RECORD_TYPE_SHARED_USER, "rec-1", Map::new()).await;
        store
            .fail_next_save(StoreError::Transient("offline".to_string()))
            .await;

        let err = store
            .save(SaveRequest {
                record_type: RECORD_TYPE_SHARED_USER.to_string(),
                record_name: "rec-1".to_string(),
                change_tag: seeded.change_tag.clone(),
                fields: Map::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transient(_)));

        // Next save goes through
        store
            .save(SaveRequest {
                record_type: RECORD_TYPE_SHARED_USER.to_string(),
                record_name: "rec-1".to_string(),
                change_tag: seeded.change_tag,
                fields: Map::new(),
            })
            .await
            .unwrap();
    }
}
