//! Show configuration model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Number of routing slots per person when the show record does not say.
pub const DEFAULT_CHANNEL_SLOT_COUNT: usize = 6;

/// Per-show configuration. Fetched once and read-only for the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowConfig {
    pub name: String,
    pub channels: Vec<String>,
    pub departments: Vec<String>,
    pub channel_slot_count: usize,
    pub channel_colors: HashMap<String, String>,
    pub department_colors: HashMap<String, String>,
    /// Departments allowed to edit; empty means all departments may edit.
    pub editable_departments: Vec<String>,
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            name: "Shared Show".to_string(),
            channels: Vec::new(),
            departments: Vec::new(),
            channel_slot_count: DEFAULT_CHANNEL_SLOT_COUNT,
            channel_colors: HashMap::new(),
            department_colors: HashMap::new(),
            editable_departments: Vec::new(),
        }
    }
}

impl ShowConfig {
    /// Channel color lookup; keys are stored uppercased.
    pub fn channel_color(&self, channel: &str) -> Option<&str> {
        if channel.is_empty() {
            return None;
        }
        self.channel_colors
            .get(&channel.to_uppercase())
            .map(String::as_str)
    }

    pub fn department_color(&self, department: &str) -> Option<&str> {
        self.department_colors.get(department).map(String::as_str)
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }
}
