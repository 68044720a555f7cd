//! Field-level bookkeeping for the sync engine.

/// Person fields the share can edit or the poll can refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersonField {
    FirstName,
    LastName,
    Nickname,
    Department,
    Role,
    HeadsetType,
    Notes,
    ChannelAssignments,
}

impl PersonField {
    /// Field name on the remote record.
    pub fn remote_name(&self) -> &'static str {
        match self {
            PersonField::FirstName => "firstName",
            PersonField::LastName => "lastName",
            PersonField::Nickname => "nickname",
            PersonField::Department => "department",
            PersonField::Role => "role",
            PersonField::HeadsetType => "headsetType",
            PersonField::Notes => "notes",
            PersonField::ChannelAssignments => "channelAssignments",
        }
    }

    /// Parse the name used by the edit route. Channel assignments are edited
    /// through the dedicated slot route, never by name.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "firstName" => Some(PersonField::FirstName),
            "lastName" => Some(PersonField::LastName),
            "nickname" => Some(PersonField::Nickname),
            "department" => Some(PersonField::Department),
            "role" => Some(PersonField::Role),
            "headsetType" => Some(PersonField::HeadsetType),
            "notes" => Some(PersonField::Notes),
            _ => None,
        }
    }
}

/// Fields the poll refreshes from remote state. Belt-pack and role are
/// assignment-time data; the share never rewrites them from a refresh.
pub const POLL_FIELDS: [PersonField; 7] = [
    PersonField::FirstName,
    PersonField::LastName,
    PersonField::Nickname,
    PersonField::Department,
    PersonField::ChannelAssignments,
    PersonField::HeadsetType,
    PersonField::Notes,
];

/// Save lifecycle of one (record, field) pair. Clean is represented by the
/// absence of a tracking entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSyncState {
    /// Edited locally; the debounced persist has not fired yet
    Pending,
    /// A version-checked write is in flight
    Saving,
    /// The write was rejected as stale; refetch-and-retry in progress
    ConflictRetry,
    /// The write failed; auto-recovers after the cool-down
    Failed,
}
