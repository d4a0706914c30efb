//! Offline-first sync: pull, push, conflict resolution and retry.

mod conflict;
mod engine;
mod error;
mod protocol;
mod pull;
mod push;
mod retry;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use conflict::{ConflictReport, ConflictResolver};
pub use engine::{CycleReport, EntitySync, SyncCycle, SyncEngine, SyncReason};
pub use error::{SyncError, SyncResult};
pub use protocol::{
    ChangeSet, Conflict, ConflictType, PullQuery, PullResponse, PushChangeSet, PushRecord,
    PushRequest, PushResponse, Resolution, BATCH_SIZE,
};
pub use pull::{PullEngine, PullProgress, PullReport};
pub use push::{PushEngine, PushOutcome};
pub use retry::{with_retry, RetryPolicy};
pub use transport::{HttpSyncTransport, SyncTransport};
