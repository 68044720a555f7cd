//! Initial data loading for a share.
//!
//! Fetches the show configuration and the person roster, applying the
//! deterministic defaults the record store's schemaless contract requires.

use std::collections::HashMap;

use crate::errors::AppError;
use crate::models::{
    sort_by_beltpack, HeadsetType, PersonRecord, ShareSession, ShowConfig,
    DEFAULT_CHANNEL_SLOT_COUNT,
};
use crate::store::{RecordStore, RemoteRecord, RECORD_TYPE_SHARED_USER};

/// Field carrying the share scope on person records.
pub const SHARE_ID_FIELD: &str = "shareID";

/// The show-configuration record is addressed by a fixed derivation from
/// the share identifier.
pub fn show_record_name(share_id: &str) -> String {
    format!("{}_show", share_id)
}

/// Load the show configuration. A missing record degrades to the defaults
/// (named after the session when it carries a display name).
pub async fn load_show(
    store: &dyn RecordStore,
    share_id: &str,
    session: &ShareSession,
) -> Result<ShowConfig, AppError> {
    let mut config = ShowConfig::default();
    if let Some(name) = &session.show_name {
        config.name = name.clone();
    }

    let Some(record) = store.fetch_by_id(&show_record_name(share_id)).await? else {
        return Ok(config);
    };

    if let Some(name) = record.str_field("name") {
        config.name = name.to_string();
    }
    config.channels = record.string_list_field("channels");
    config.departments = record.string_list_field("departments");
    config.channel_slot_count = record
        .i64_field("channelSlotCount")
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_CHANNEL_SLOT_COUNT);
    config.channel_colors = color_map(&record, "channelColorsJSON");
    config.department_colors = color_map(&record, "departmentColorsJSON");
    config.editable_departments = record.string_list_field("editableDepartments");

    Ok(config)
}

/// Embedded color maps arrive as JSON strings; malformed payloads degrade to
/// empty maps rather than aborting the load.
fn color_map(record: &RemoteRecord, field: &str) -> HashMap<String, String> {
    let Some(raw) = record.str_field(field) else {
        return HashMap::new();
    };
    match serde_json::from_str(raw) {
        Ok(map) => map,
        Err(err) => {
            tracing::warn!(
                "Ignoring malformed {} on {}: {}",
                field,
                record.record_name,
                err
            );
            HashMap::new()
        }
    }
}

/// Load the person roster for a share. Results arrive unordered and are
/// sorted for display; duplicate record names collapse to the last row.
pub async fn load_people(
    store: &dyn RecordStore,
    share_id: &str,
) -> Result<Vec<PersonRecord>, AppError> {
    let records = store
        .query(RECORD_TYPE_SHARED_USER, SHARE_ID_FIELD, share_id)
        .await?;

    let mut by_name: HashMap<String, PersonRecord> = HashMap::new();
    for record in &records {
        by_name.insert(record.record_name.clone(), person_from_record(record));
    }

    let mut people: Vec<PersonRecord> = by_name.into_values().collect();
    sort_by_beltpack(&mut people);
    Ok(people)
}

pub(crate) fn person_from_record(record: &RemoteRecord) -> PersonRecord {
    PersonRecord {
        record_name: record.record_name.clone(),
        user_id: record.str_field("userID").unwrap_or_default().to_string(),
        first_name: record.str_field("firstName").unwrap_or_default().to_string(),
        last_name: record.str_field("lastName").unwrap_or_default().to_string(),
        nickname: record.str_field("nickname").unwrap_or_default().to_string(),
        beltpack_number: record.i64_field("beltpackNumber"),
        channel_assignments: record.string_list_field("channelAssignments"),
        department: record.str_field("department").unwrap_or_default().to_string(),
        role: record.str_field("role").unwrap_or_default().to_string(),
        headset_type: record
            .str_field("headsetType")
            .and_then(HeadsetType::from_str)
            .unwrap_or_default(),
        notes: record.str_field("notes").unwrap_or_default().to_string(),
        change_tag: record.change_tag.clone(),
    }
}
