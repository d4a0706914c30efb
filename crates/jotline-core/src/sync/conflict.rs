//! Server-wins conflict resolution.

use crate::db::{RecordRepository, SqliteRecordRepository};
use crate::services::LocalStore;

use super::protocol::Conflict;

/// Tally of a batch of applied conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub applied: usize,
    pub failed: usize,
}

impl ConflictReport {
    pub fn merge(&mut self, other: Self) {
        self.applied += other.applied;
        self.failed += other.failed;
    }

    pub const fn total(&self) -> usize {
        self.applied + self.failed
    }
}

/// Overwrites local rows with the server's version of conflicting records.
#[derive(Clone)]
pub struct ConflictResolver {
    store: LocalStore,
}

impl ConflictResolver {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Apply the server version of every conflict. Never fails: a storage
    /// error on one conflict is logged and counted.
    pub async fn apply_conflicts(&self, conflicts: &[Conflict]) -> ConflictReport {
        let mut report = ConflictReport::default();

        for conflict in conflicts {
            let applied = self
                .store
                .transaction(|conn| {
                    SqliteRecordRepository::new(conn)
                        .apply_remote(conflict.entity, &conflict.server_version)
                })
                .await;

            match applied {
                Ok(()) => {
                    tracing::info!(
                        entity = %conflict.entity,
                        record_id = %conflict.record_id,
                        conflict_type = conflict.conflict_type.as_str(),
                        "Resolved conflict with server version"
                    );
                    self.store.notify(conflict.entity, conflict.record_id);
                    report.applied += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        entity = %conflict.entity,
                        record_id = %conflict.record_id,
                        "Failed to apply server version: {error}"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, RecordId, SyncRecord};
    use crate::sync::protocol::ConflictType;
    use crate::sync::testing::fields;
    use serde_json::json;

    #[tokio::test]
    async fn server_version_replaces_local_edit() {
        let store = LocalStore::open_in_memory().unwrap();
        let local = store
            .create_record(EntityKind::Todos, fields(json!({ "title": "mine" })))
            .await
            .unwrap();

        let server_version = SyncRecord {
            last_modified: 42,
            ..SyncRecord::new(local.id(), fields(json!({ "title": "theirs" })))
        };
        let report = ConflictResolver::new(store.clone())
            .apply_conflicts(&[Conflict::server_wins(
                EntityKind::Todos,
                ConflictType::LostUpdate,
                server_version.clone(),
            )])
            .await;

        assert_eq!(report, ConflictReport { applied: 1, failed: 0 });
        let stored = store
            .get_record(EntityKind::Todos, &local.id())
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.dirty);
        assert_eq!(stored.record, server_version);
    }

    #[tokio::test]
    async fn missing_local_row_is_inserted() {
        let store = LocalStore::open_in_memory().unwrap();
        let server_version = SyncRecord {
            last_modified: 7,
            ..SyncRecord::new(RecordId::new(), fields(json!({ "body": "remote" })))
        };

        let report = ConflictResolver::new(store.clone())
            .apply_conflicts(&[Conflict::server_wins(
                EntityKind::Thoughts,
                ConflictType::DeletedRemotely,
                server_version.clone(),
            )])
            .await;

        assert_eq!(report.applied, 1);
        assert!(store
            .get_record(EntityKind::Thoughts, &server_version.id)
            .await
            .unwrap()
            .is_some());
    }
}
