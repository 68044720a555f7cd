//! Client-visible state signals.

use serde::{Deserialize, Serialize};

/// Aggregate save indicator shown next to the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Syncing,
    Error,
}

/// Top-level view phase of a share page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "message", rename_all = "kebab-case")]
pub enum SharePhase {
    Loading,
    NeedsPasscode,
    PasscodeIncorrect,
    FatalError(String),
    Ready,
}
