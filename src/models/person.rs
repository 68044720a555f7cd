//! Person record model matching the browser-side SharedUser interface.

use serde::{Deserialize, Serialize};

/// Headset hardware worn by a person.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum HeadsetType {
    #[default]
    #[serde(rename = "Single Ear")]
    SingleEar,
    #[serde(rename = "Dual Ear")]
    DualEar,
    #[serde(rename = "In-Ear")]
    InEar,
    Custom,
}

impl HeadsetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeadsetType::SingleEar => "Single Ear",
            HeadsetType::DualEar => "Dual Ear",
            HeadsetType::InEar => "In-Ear",
            HeadsetType::Custom => "Custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Single Ear" => Some(HeadsetType::SingleEar),
            "Dual Ear" => Some(HeadsetType::DualEar),
            "In-Ear" => Some(HeadsetType::InEar),
            "Custom" => Some(HeadsetType::Custom),
            _ => None,
        }
    }
}

/// One row of the roster: a person and their comms assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRecord {
    /// Store-assigned record identifier.
    pub record_name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Terse on-air call-name.
    #[serde(default)]
    pub nickname: String,
    /// Display sort key only; never edited through the share.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beltpack_number: Option<i64>,
    /// One entry per routing slot; empty string means unassigned.
    #[serde(default)]
    pub channel_assignments: Vec<String>,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub headset_type: HeadsetType,
    #[serde(default)]
    pub notes: String,
    /// Opaque version token from the record store; changes on every write.
    #[serde(default)]
    pub change_tag: String,
}

/// Sort for display: belt-pack ascending, absent belt-packs last.
pub fn sort_by_beltpack(people: &mut [PersonRecord]) {
    people.sort_by_key(|p| p.beltpack_number.unwrap_or(i64::MAX));
}
