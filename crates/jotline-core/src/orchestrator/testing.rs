//! Sync cycle double for orchestrator tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::state::SyncState;
use crate::sync::{CycleReport, SyncCycle, SyncReason, SyncResult};

#[derive(Default)]
pub(crate) struct CountingCycle {
    reasons: Mutex<Vec<SyncReason>>,
    offline: AtomicUsize,
}

impl CountingCycle {
    pub(crate) fn runs(&self) -> usize {
        self.reasons.lock().unwrap().len()
    }

    pub(crate) fn reasons(&self) -> Vec<SyncReason> {
        self.reasons.lock().unwrap().clone()
    }

    pub(crate) fn offline_reports(&self) -> usize {
        self.offline.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncCycle for CountingCycle {
    async fn run_cycle(&self, reason: SyncReason) -> SyncResult<CycleReport> {
        self.reasons.lock().unwrap().push(reason);
        Ok(CycleReport {
            reason,
            entities: Vec::new(),
            pending: 0,
            state: SyncState::Synced,
        })
    }

    fn went_offline(&self) {
        self.offline.fetch_add(1, Ordering::SeqCst);
    }
}
