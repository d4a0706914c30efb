//! Full sync cycles across every collection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;

use crate::db::{CursorRepository, SqliteCursorRepository};
use crate::models::{CursorStatus, EntityKind};
use crate::services::LocalStore;
use crate::state::SyncState;

use super::error::{SyncError, SyncResult};
use super::pull::{PullEngine, PullReport};
use super::push::{PushEngine, PushOutcome};
use super::retry::RetryPolicy;
use super::transport::SyncTransport;

/// What triggered a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncReason {
    Initial,
    Manual,
    Reconnect,
    Periodic,
}

impl SyncReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Manual => "manual",
            Self::Reconnect => "reconnect",
            Self::Periodic => "periodic",
        }
    }

    /// Higher runs first when a caller has to choose.
    pub const fn priority(self) -> u8 {
        match self {
            Self::Initial => 3,
            Self::Manual => 2,
            Self::Reconnect => 1,
            Self::Periodic => 0,
        }
    }
}

impl std::fmt::Display for SyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one collection within a cycle.
#[derive(Debug)]
pub struct EntitySync {
    pub entity: EntityKind,
    pub outcome: SyncResult<(PullReport, PushOutcome)>,
}

/// Result of a full sync cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub reason: SyncReason,
    pub entities: Vec<EntitySync>,
    /// Records still waiting to be pushed after the cycle.
    pub pending: usize,
    pub state: SyncState,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.entities.iter().all(|entity| entity.outcome.is_ok())
    }

    pub fn pulled(&self) -> usize {
        self.entities
            .iter()
            .filter_map(|entity| entity.outcome.as_ref().ok())
            .map(|(pull, _)| pull.applied)
            .sum()
    }

    pub fn pushed(&self) -> usize {
        self.entities
            .iter()
            .filter_map(|entity| entity.outcome.as_ref().ok())
            .map(|(_, push)| push.acknowledged)
            .sum()
    }

    pub fn conflicts(&self) -> usize {
        self.entities
            .iter()
            .filter_map(|entity| entity.outcome.as_ref().ok())
            .map(|(pull, push)| pull.conflicts.total() + push.conflicts.len())
            .sum()
    }
}

/// Anything that can run a sync cycle on behalf of an orchestrator.
#[async_trait]
pub trait SyncCycle: Send + Sync {
    async fn run_cycle(&self, reason: SyncReason) -> SyncResult<CycleReport>;

    /// Called when connectivity is lost.
    fn went_offline(&self) {}
}

/// Pull-then-push over every collection, one cycle per collection at a time.
#[derive(Clone)]
pub struct SyncEngine {
    store: LocalStore,
    pull: PullEngine,
    push: PushEngine,
    locks: Arc<HashMap<EntityKind, Arc<Mutex<()>>>>,
    state: Arc<watch::Sender<SyncState>>,
}

impl SyncEngine {
    pub fn new(store: LocalStore, transport: Arc<dyn SyncTransport>, policy: RetryPolicy) -> Self {
        let locks = EntityKind::ALL
            .iter()
            .map(|entity| (*entity, Arc::new(Mutex::new(()))))
            .collect();
        let (state, _) = watch::channel(SyncState::default());
        Self {
            pull: PullEngine::new(store.clone(), Arc::clone(&transport), policy),
            push: PushEngine::new(store.clone(), transport, policy),
            store,
            locks: Arc::new(locks),
            state: Arc::new(state),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn pull_engine(&self) -> &PullEngine {
        &self.pull
    }

    pub const fn push_engine(&self) -> &PushEngine {
        &self.push
    }

    /// Observe the sync status.
    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub(crate) fn publish(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    /// Hold the cycle lock of one collection.
    pub(crate) async fn lock_entity(&self, entity: EntityKind) -> Option<OwnedMutexGuard<()>> {
        let lock = self.locks.get(&entity)?;
        Some(Arc::clone(lock).lock_owned().await)
    }

    /// Pull then push one collection under its cycle lock.
    pub async fn sync_entity(&self, entity: EntityKind) -> SyncResult<(PullReport, PushOutcome)> {
        let _guard = self.lock_entity(entity).await;

        let result = async {
            let pulled = self.pull.pull(entity).await?;
            let pushed = self.push.push(entity).await?;
            Ok::<_, SyncError>((pulled, pushed))
        }
        .await;

        let (status, message) = match &result {
            Ok(_) => (CursorStatus::Success, None),
            Err(error) => (CursorStatus::Error, Some(error.to_string())),
        };
        if let Err(error) = self
            .store
            .read(|conn| {
                SqliteCursorRepository::new(conn).record_outcome(entity, status, message.as_deref())
            })
            .await
        {
            tracing::warn!(entity = %entity, "Failed to record sync outcome: {error}");
        }

        result
    }

    async fn cycle(&self, reason: SyncReason) -> SyncResult<CycleReport> {
        self.publish(SyncState::Syncing);
        tracing::info!(
            reason = reason.as_str(),
            priority = reason.priority(),
            "Starting sync cycle"
        );

        let mut tasks = JoinSet::new();
        for entity in EntityKind::ALL {
            let engine = self.clone();
            tasks.spawn(async move {
                let outcome = engine.sync_entity(entity).await;
                EntitySync { entity, outcome }
            });
        }

        let mut entities = Vec::with_capacity(EntityKind::ALL.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entity) => entities.push(entity),
                Err(error) => {
                    tracing::error!("Sync task failed: {error}");
                }
            }
        }
        entities.sort_by_key(|entity| entity.entity);

        let pending = match self.store.count_dirty(None).await {
            Ok(pending) => pending,
            Err(error) => {
                self.publish(SyncState::Error);
                return Err(error.into());
            }
        };

        let fatal = entities.iter().any(|entity| {
            entity
                .outcome
                .as_ref()
                .is_err_and(|error| !error.is_retryable())
        });
        let deferred = entities.iter().any(|entity| entity.outcome.is_err());
        let state = if fatal || entities.len() < EntityKind::ALL.len() {
            SyncState::Error
        } else if deferred || pending > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        };

        for entity in &entities {
            if let Err(error) = &entity.outcome {
                tracing::warn!(
                    entity = %entity.entity,
                    reason = reason.as_str(),
                    retryable = error.is_retryable(),
                    "Sync failed: {error}"
                );
            }
        }
        tracing::info!(
            reason = reason.as_str(),
            state = state.as_str(),
            pending,
            "Sync cycle finished"
        );

        self.publish(state);
        Ok(CycleReport {
            reason,
            entities,
            pending,
            state,
        })
    }
}

#[async_trait]
impl SyncCycle for SyncEngine {
    async fn run_cycle(&self, reason: SyncReason) -> SyncResult<CycleReport> {
        self.cycle(reason).await
    }

    fn went_offline(&self) {
        self.publish(SyncState::Offline);
    }
}
