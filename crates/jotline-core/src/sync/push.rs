//! Upload of dirty records.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::db::{CursorRepository, RecordRepository, SqliteCursorRepository, SqliteRecordRepository};
use crate::models::{EntityKind, RecordId};
use crate::services::LocalStore;

use super::conflict::{ConflictReport, ConflictResolver};
use super::error::{SyncError, SyncResult};
use super::protocol::{Conflict, PushChangeSet, PushRecord, PushRequest};
use super::retry::{with_retry, RetryPolicy};
use super::transport::SyncTransport;

/// Outcome of a push for one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOutcome {
    /// Ids the server accepted.
    pub synced_ids: Vec<RecordId>,
    pub conflicts: Vec<Conflict>,
    /// Accepted records whose dirty flag was cleared. Records edited while the
    /// push was in flight stay queued.
    pub acknowledged: usize,
    pub resolved: ConflictReport,
}

/// Sends dirty records and folds the server's verdict back into the store.
#[derive(Clone)]
pub struct PushEngine {
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    policy: RetryPolicy,
    resolver: ConflictResolver,
}

impl PushEngine {
    pub fn new(store: LocalStore, transport: Arc<dyn SyncTransport>, policy: RetryPolicy) -> Self {
        let resolver = ConflictResolver::new(store.clone());
        Self {
            store,
            transport,
            policy,
            resolver,
        }
    }

    pub async fn push(&self, entity: EntityKind) -> SyncResult<PushOutcome> {
        let (dirty, last_pulled_at) = self
            .store
            .read(|conn| {
                let dirty = SqliteRecordRepository::new(conn).list_dirty(entity)?;
                let cursor = SqliteCursorRepository::new(conn).load(entity)?;
                Ok((dirty, cursor.last_pulled_at))
            })
            .await?;

        if dirty.is_empty() {
            return Ok(PushOutcome::default());
        }

        let revisions: HashMap<RecordId, i64> = dirty
            .iter()
            .map(|record| (record.id(), record.revision))
            .collect();
        let mut changes = PushChangeSet::default();
        for local in &dirty {
            let record = PushRecord::from(&local.record);
            if local.record.is_deleted() {
                changes.deleted.push(record);
            } else {
                changes.updated.push(record);
            }
        }
        let request = PushRequest {
            last_pulled_at,
            changes: BTreeMap::from([(entity.as_str().to_string(), changes)]),
        };

        let response = with_retry(
            &self.policy,
            "push",
            || self.transport.push(&request),
            SyncError::is_retryable,
        )
        .await?;

        let acknowledged = self
            .store
            .transaction(|conn| {
                let records = SqliteRecordRepository::new(conn);
                let mut acknowledged = 0;
                for id in &response.synced_record_ids {
                    let Some(revision) = revisions.get(id) else {
                        continue;
                    };
                    if records.mark_pushed(entity, id, *revision, response.timestamp)? {
                        acknowledged += 1;
                    }
                }
                SqliteCursorRepository::new(conn).record_pushed(entity, response.timestamp)?;
                Ok(acknowledged)
            })
            .await?;

        let resolved = self.resolver.apply_conflicts(&response.conflicts).await;

        tracing::info!(
            entity = %entity,
            sent = dirty.len(),
            acknowledged,
            conflicts = response.conflicts.len(),
            "Push complete"
        );

        Ok(PushOutcome {
            synced_ids: response.synced_record_ids,
            conflicts: response.conflicts,
            acknowledged,
            resolved,
        })
    }
}
