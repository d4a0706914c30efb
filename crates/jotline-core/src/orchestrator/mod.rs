//! Sync triggers: reconnect, periodic tick and first login.
//!
//! Every orchestrator funnels into the same [`SyncCycle`](crate::sync::SyncCycle),
//! labelled with a [`SyncReason`](crate::sync::SyncReason).

mod initial;
mod periodic;
mod reconnect;

#[cfg(test)]
mod testing;

pub use initial::{
    InitialSyncOrchestrator, InitialSyncProgress, InitialSyncReport, INITIAL_SYNC_META_KEY,
};
pub use periodic::{PeriodicOrchestrator, DEFAULT_PERIODIC_INTERVAL};
pub use reconnect::{ReconnectOrchestrator, DEFAULT_RECONNECT_DEBOUNCE};
