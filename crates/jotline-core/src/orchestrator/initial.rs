//! One-shot full sync after a fresh login.

use serde::Serialize;
use tokio::sync::watch;

use crate::db::{CursorRepository, SqliteCursorRepository};
use crate::models::{CursorStatus, EntityKind};
use crate::state::SyncState;
use crate::sync::{PullReport, PushOutcome, SyncEngine, SyncResult};

/// `sync_meta` key holding the user id whose initial sync completed.
pub const INITIAL_SYNC_META_KEY: &str = "initial_sync_user";

/// Progress of an initial sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InitialSyncProgress {
    /// Collection currently being pulled.
    pub entity: Option<EntityKind>,
    pub fetched: u64,
    /// Sum of the server totals reported so far.
    pub total: u64,
    /// Completed share, 0..=100. Never decreases within a run.
    pub percent: u8,
    pub done: bool,
}

#[derive(Debug, Default)]
pub struct InitialSyncReport {
    pub pulled: Vec<(EntityKind, PullReport)>,
    pub pushed: Vec<(EntityKind, PushOutcome)>,
}

impl InitialSyncReport {
    pub fn applied(&self) -> usize {
        self.pulled.iter().map(|(_, report)| report.applied).sum()
    }
}

/// Pulls every collection from zero once per user, then pushes anything
/// created locally before the first sync.
pub struct InitialSyncOrchestrator {
    engine: SyncEngine,
    progress: watch::Sender<InitialSyncProgress>,
}

impl InitialSyncOrchestrator {
    pub fn new(engine: SyncEngine) -> Self {
        let (progress, _) = watch::channel(InitialSyncProgress::default());
        Self { engine, progress }
    }

    /// Observe progress of the running initial sync.
    pub fn progress(&self) -> watch::Receiver<InitialSyncProgress> {
        self.progress.subscribe()
    }

    /// Whether the initial sync already completed for `user_id`.
    pub async fn is_done_for(&self, user_id: &str) -> SyncResult<bool> {
        let stored = self
            .engine
            .store()
            .read(|conn| SqliteCursorRepository::new(conn).get_meta(INITIAL_SYNC_META_KEY))
            .await?;
        Ok(stored.as_deref() == Some(user_id))
    }

    /// Run the initial sync unless it already completed for this user.
    pub async fn run_if_needed(&self, user_id: &str) -> SyncResult<Option<InitialSyncReport>> {
        if self.is_done_for(user_id).await? {
            tracing::debug!("Initial sync already done for this user");
            return Ok(None);
        }
        self.run(user_id).await.map(Some)
    }

    /// Run the initial sync unconditionally.
    pub async fn run(&self, user_id: &str) -> SyncResult<InitialSyncReport> {
        self.engine.publish(SyncState::Syncing);
        let result = self.run_inner(user_id).await;
        match &result {
            Ok(_) => {
                let pending = self.engine.store().count_dirty(None).await?;
                self.engine.publish(if pending == 0 {
                    SyncState::Synced
                } else {
                    SyncState::Pending
                });
            }
            Err(error) => {
                tracing::warn!("Initial sync failed: {error}");
                self.engine.publish(if error.is_retryable() {
                    SyncState::Pending
                } else {
                    SyncState::Error
                });
            }
        }
        result
    }

    async fn run_inner(&self, user_id: &str) -> SyncResult<InitialSyncReport> {
        let store = self.engine.store();
        let entity_count = EntityKind::ALL.len() as u64;
        let mut report = InitialSyncReport::default();
        let mut fetched_before = 0_u64;
        let mut total_before = 0_u64;

        tracing::info!("Starting initial sync");
        self.progress.send_replace(InitialSyncProgress::default());

        for (index, entity) in EntityKind::ALL.into_iter().enumerate() {
            let _guard = self.engine.lock_entity(entity).await;
            store
                .transaction(|conn| SqliteCursorRepository::new(conn).reset_pulled(entity))
                .await?;

            let completed = index as u64;
            let mut entity_total = 0_u64;
            let mut entity_fetched = 0_u64;
            let pulled = self
                .engine
                .pull_engine()
                .pull_with_progress(entity, 0, |page| {
                    entity_fetched = page.fetched;
                    entity_total = page.total.unwrap_or(page.fetched).max(page.fetched);
                    let within = if entity_total == 0 {
                        100
                    } else {
                        entity_fetched * 100 / entity_total
                    };
                    let percent = (completed * 100 + within) / entity_count;
                    self.progress.send_modify(|progress| {
                        progress.entity = Some(entity);
                        progress.fetched = fetched_before + entity_fetched;
                        progress.total = total_before + entity_total;
                        progress.percent = progress
                            .percent
                            .max(u8::try_from(percent.min(100)).unwrap_or(100));
                    });
                })
                .await?;
            fetched_before += entity_fetched;
            total_before += entity_total;
            report.pulled.push((entity, pulled));
        }

        for entity in EntityKind::ALL {
            let _guard = self.engine.lock_entity(entity).await;
            let pushed = self.engine.push_engine().push(entity).await?;
            report.pushed.push((entity, pushed));
        }

        store
            .transaction(|conn| {
                let cursors = SqliteCursorRepository::new(conn);
                for entity in EntityKind::ALL {
                    cursors.record_outcome(entity, CursorStatus::Success, None)?;
                }
                cursors.set_meta(INITIAL_SYNC_META_KEY, user_id)
            })
            .await?;

        self.progress.send_modify(|progress| {
            progress.entity = None;
            progress.percent = 100;
            progress.done = true;
        });
        tracing::info!(applied = report.applied(), "Initial sync complete");
        Ok(report)
    }
}
