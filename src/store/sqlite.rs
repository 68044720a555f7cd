//! SQLite-backed record store for self-hosted deployments.
//!
//! Records live in a single table as JSON field maps; optimistic concurrency
//! is a conditional UPDATE on the change tag.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{RecordStore, RemoteRecord, SaveRequest, SavedRecord, StoreError};

/// Initialize the record-store connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            record_name TEXT PRIMARY KEY,
            record_type TEXT NOT NULL,
            fields TEXT NOT NULL,
            change_tag TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_type ON records(record_type);")
        .execute(pool)
        .await?;

    Ok(())
}

/// Record store over a local SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a record with a fresh change tag. Used for seeding;
    /// the share-editing path only ever merges via [`RecordStore::save`].
    pub async fn insert(
        &self,
        record_type: &str,
        record_name: &str,
        fields: Map<String, Value>,
    ) -> Result<SavedRecord, StoreError> {
        let change_tag = uuid::Uuid::new_v4().to_string();
        let fields_json = Value::Object(fields).to_string();

        sqlx::query(
            "INSERT OR REPLACE INTO records (record_name, record_type, fields, change_tag) VALUES (?, ?, ?, ?)",
        )
        .bind(record_name)
        .bind(record_type)
        .bind(&fields_json)
        .bind(&change_tag)
        .execute(&self.pool)
        .await?;

        Ok(SavedRecord {
            record_name: record_name.to_string(),
            change_tag,
        })
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> RemoteRecord {
    let fields_str: String = row.get("fields");
    let fields = serde_json::from_str::<Value>(&fields_str)
        .ok()
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    RemoteRecord {
        record_type: row.get("record_type"),
        record_name: row.get("record_name"),
        change_tag: row.get("change_tag"),
        fields,
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<RemoteRecord>, StoreError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                "SELECT record_name, record_type, fields, change_tag FROM records WHERE record_name = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row.as_ref() {
                records.push(record_from_row(row));
            }
        }
        Ok(records)
    }

    async fn query(
        &self,
        record_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<RemoteRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT record_name, record_type, fields, change_tag FROM records \
             WHERE record_type = ? AND json_extract(fields, '$.' || ?) = ?",
        )
        .bind(record_type)
        .bind(field)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn save(&self, request: SaveRequest) -> Result<SavedRecord, StoreError> {
        let row = sqlx::query(
            "SELECT record_name, record_type, fields, change_tag FROM records WHERE record_name = ?",
        )
        .bind(&request.record_name)
        .fetch_optional(&self.pool)
        .await?;

        let existing = match row.as_ref() {
            Some(row) => record_from_row(row),
            None => return Err(StoreError::NotFound(request.record_name)),
        };

        if existing.change_tag != request.change_tag {
            return Err(StoreError::VersionConflict {
                current_change_tag: existing.change_tag,
            });
        }

        let mut fields = existing.fields;
        fields.extend(request.fields);
        let fields_json = Value::Object(fields).to_string();
        let new_tag = uuid::Uuid::new_v4().to_string();

        // Conditional UPDATE guards against a concurrent writer that slipped
        // in between the read and this statement.
        let result = sqlx::query(
            "UPDATE records SET fields = ?, change_tag = ? WHERE record_name = ? AND change_tag = ?",
        )
        .bind(&fields_json)
        .bind(&new_tag)
        .bind(&request.record_name)
        .bind(&request.change_tag)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.fetch_by_id(&request.record_name).await?;
            return Err(StoreError::VersionConflict {
                current_change_tag: current.map(|r| r.change_tag).unwrap_or_default(),
            });
        }

        Ok(SavedRecord {
            record_name: request.record_name,
            change_tag: new_tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RECORD_TYPE_SHARED_USER;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteStore {
        let pool = init_database(&dir.path().join("records.sqlite"))
            .await
            .expect("init db");
        SqliteStore::new(pool)
    }

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_save_round_trip_adopts_new_tag() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let seeded = store
            .insert(
                RECORD_TYPE_SHARED_USER,
                "rec-1",
                fields(&[("firstName", json!("Al")), ("shareID", json!("s1"))]),
            )
            .await
            .unwrap();

        let saved = store
            .save(SaveRequest {
                record_type: RECORD_TYPE_SHARED_USER.to_string(),
                record_name: "rec-1".to_string(),
                change_tag: seeded.change_tag.clone(),
                fields: fields(&[("firstName", json!("Alex"))]),
            })
            .await
            .unwrap();

        assert_ne!(saved.change_tag, seeded.change_tag);

        let record = store.fetch_by_id("rec-1").await.unwrap().unwrap();
        assert_eq!(record.change_tag, saved.change_tag);
        assert_eq!(record.str_field("firstName"), Some("Alex"));
        // Untouched fields survive the merge
        assert_eq!(record.str_field("shareID"), Some("s1"));
    }

    #[tokio::test]
    async fn test_stale_tag_is_rejected_with_current_tag() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let seeded = store
            .insert(
                RECORD_TYPE_SHARED_USER,
                "rec-1",
                fields(&[("firstName", json!("Al"))]),
            )
            .await
            .unwrap();

        let saved = store
            .save(SaveRequest {
                record_type: RECORD_TYPE_SHARED_USER.to_string(),
                record_name: "rec-1".to_string(),
                change_tag: seeded.change_tag.clone(),
                fields: fields(&[("firstName", json!("Alex"))]),
            })
            .await
            .unwrap();

        // A second writer still holding the earlier tag must be rejected.
        let err = store
            .save(SaveRequest {
                record_type: RECORD_TYPE_SHARED_USER.to_string(),
                record_name: "rec-1".to_string(),
                change_tag: seeded.change_tag,
                fields: fields(&[("firstName", json!("Ann"))]),
            })
            .await
            .unwrap_err();

        match err {
            StoreError::VersionConflict { current_change_tag } => {
                assert_eq!(current_change_tag, saved.change_tag);
            }
            other => panic!("expected VersionConflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_filters_by_field_equality() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .insert(
                RECORD_TYPE_SHARED_USER,
                "rec-1",
                fields(&[("shareID", json!("s1"))]),
            )
            .await
            .unwrap();
        store
            .insert(
                RECORD_TYPE_SHARED_USER,
                "rec-2",
                fields(&[("shareID", json!("s2"))]),
            )
            .await
            .unwrap();

        let records = store
            .query(RECORD_TYPE_SHARED_USER, "shareID", "s1")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_name, "rec-1");
    }

    #[tokio::test]
    async fn test_save_missing_record_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let err = store
            .save(SaveRequest {
                record_type: RECORD_TYPE_SHARED_USER.to_string(),
                record_name: "ghost".to_string(),
                change_tag: "t".to_string(),
                fields: Map::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
