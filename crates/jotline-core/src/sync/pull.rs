//! Paginated pull of server changes into the local store.

use std::sync::Arc;

use crate::db::{CursorRepository, RecordRepository, SqliteCursorRepository, SqliteRecordRepository};
use crate::models::{EntityKind, RecordId};
use crate::services::LocalStore;

use super::conflict::ConflictReport;
use super::error::{SyncError, SyncResult};
use super::protocol::{ConflictType, PullQuery, PullResponse, BATCH_SIZE};
use super::retry::{with_retry, RetryPolicy};
use super::transport::SyncTransport;

/// Progress of a pull run, reported after every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PullProgress {
    pub entity: Option<EntityKind>,
    /// Records received so far in this run.
    pub fetched: u64,
    /// Server estimate of the records newer than the run's watermark.
    pub total: Option<u64>,
}

/// Outcome of a pull run for one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PullReport {
    /// Records written to the local store.
    pub applied: usize,
    /// Echoes of this device's own pushes skipped in favor of a newer local edit.
    pub skipped: usize,
    pub pages: usize,
    pub conflicts: ConflictReport,
    /// Watermark stored after the last page.
    pub watermark: i64,
}

struct PageOutcome {
    applied: usize,
    skipped: usize,
    /// Dirty local rows overwritten by a newer server version.
    conflicts: usize,
    watermark: i64,
}

/// Fetches server changes in fixed-size pages and applies them.
#[derive(Clone)]
pub struct PullEngine {
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    policy: RetryPolicy,
}

impl PullEngine {
    pub const fn new(
        store: LocalStore,
        transport: Arc<dyn SyncTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            transport,
            policy,
        }
    }

    /// Pull everything newer than the stored watermark.
    pub async fn pull(&self, entity: EntityKind) -> SyncResult<PullReport> {
        let since = self.store.cursor(entity).await?.last_pulled_at;
        self.pull_with_progress(entity, since, |_| {}).await
    }

    /// Pull everything newer than `since`, reporting progress after each page.
    ///
    /// `since` stays fixed for the whole run while the offset walks forward,
    /// so the server's result set does not shift under the pagination. The
    /// watermark is persisted with each page, so an interrupted run resumes
    /// from the last applied page. The run ends on a short page or once the
    /// server's `total` has been received.
    pub async fn pull_with_progress(
        &self,
        entity: EntityKind,
        since: i64,
        mut observer: impl FnMut(PullProgress) + Send,
    ) -> SyncResult<PullReport> {
        let mut report = PullReport {
            watermark: since,
            ..PullReport::default()
        };
        let mut fetched = 0_u64;
        let mut offset = 0;

        loop {
            let query = PullQuery {
                entity,
                since,
                limit: BATCH_SIZE,
                offset,
            };
            let response = with_retry(
                &self.policy,
                "pull",
                || self.transport.pull(&query),
                SyncError::is_retryable,
            )
            .await?;

            let page_len = response.changes.len();
            let page = self.apply_page(entity, &response).await?;

            report.pages += 1;
            report.applied += page.applied;
            report.skipped += page.skipped;
            report.watermark = page.watermark;
            report.conflicts.applied += page.conflicts;

            fetched += page_len as u64;
            observer(PullProgress {
                entity: Some(entity),
                fetched,
                total: response.total,
            });

            tracing::debug!(
                entity = %entity,
                offset,
                received = page_len,
                applied = page.applied,
                "Applied pull page"
            );

            let drained = response.total.is_some_and(|total| fetched >= total);
            if page_len < BATCH_SIZE || drained {
                break;
            }
            offset += BATCH_SIZE;
        }

        tracing::info!(
            entity = %entity,
            applied = report.applied,
            pages = report.pages,
            conflicts = report.conflicts.total(),
            "Pull complete"
        );
        Ok(report)
    }

    /// Apply one page and advance the watermark in a single transaction.
    ///
    /// A dirty local row older than the incoming version is overwritten in the
    /// same transaction, so the watermark never moves past a server edit that
    /// was not stored. Any write failure rolls back the page.
    async fn apply_page(
        &self,
        entity: EntityKind,
        response: &PullResponse,
    ) -> SyncResult<PageOutcome> {
        let outcome = self
            .store
            .transaction(|conn| {
                let records = SqliteRecordRepository::new(conn);
                let mut outcome = PageOutcome {
                    applied: 0,
                    skipped: 0,
                    conflicts: 0,
                    watermark: 0,
                };

                for incoming in response
                    .changes
                    .updated
                    .iter()
                    .chain(&response.changes.deleted)
                {
                    match records.get(entity, &incoming.id)? {
                        Some(local) if local.dirty => {
                            if local.record.last_modified >= incoming.last_modified {
                                outcome.skipped += 1;
                            } else {
                                records.apply_remote(entity, incoming)?;
                                tracing::info!(
                                    entity = %entity,
                                    record_id = %incoming.id,
                                    conflict_type = ConflictType::PendingLocalEdit.as_str(),
                                    "Resolved conflict with server version"
                                );
                                outcome.conflicts += 1;
                            }
                        }
                        _ => {
                            records.apply_remote(entity, incoming)?;
                            outcome.applied += 1;
                        }
                    }
                }

                outcome.watermark =
                    SqliteCursorRepository::new(conn).advance_pulled(entity, response.timestamp)?;
                Ok(outcome)
            })
            .await?;

        let applied_ids: Vec<RecordId> = response
            .changes
            .updated
            .iter()
            .chain(&response.changes.deleted)
            .map(|record| record.id)
            .collect();
        self.store.notify_all(entity, applied_ids);

        Ok(outcome)
    }
}
