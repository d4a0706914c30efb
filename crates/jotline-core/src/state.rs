//! Shared cross-platform state types.

use serde::Serialize;

/// Unified sync state surfaced to clients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No cycle has run yet, or the device is known to be offline.
    #[default]
    Offline,
    Syncing,
    /// Last cycle finished and nothing is waiting to be pushed.
    Synced,
    /// Last cycle finished but local changes are still queued, or a collection
    /// hit a retryable failure and will be retried next cycle.
    Pending,
    Error,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }
}
