//! Fixed-interval sync while the app is in the foreground.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::network::NetworkMonitor;
use crate::sync::{SyncCycle, SyncReason};

pub const DEFAULT_PERIODIC_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Ticks every `period` while started. A tick only syncs when the monitor
/// reports online; offline ticks do nothing.
pub struct PeriodicOrchestrator {
    monitor: NetworkMonitor,
    cycle: Arc<dyn SyncCycle>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicOrchestrator {
    pub fn new(monitor: NetworkMonitor, cycle: Arc<dyn SyncCycle>, period: Duration) -> Self {
        Self {
            monitor,
            cycle,
            period,
            task: Mutex::new(None),
        }
    }

    /// Start ticking (app entered the foreground). No-op when already started.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let monitor = self.monitor.clone();
        let cycle = Arc::clone(&self.cycle);
        let period = self.period;
        *task = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                tick(&monitor, cycle.as_ref()).await;
            }
        }));
        tracing::debug!(period_secs = period.as_secs(), "Periodic sync started");
    }

    /// Stop ticking (app went to the background).
    pub fn stop(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("Periodic sync stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for PeriodicOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick(monitor: &NetworkMonitor, cycle: &dyn SyncCycle) {
    if !monitor.is_online() {
        tracing::debug!(state = monitor.current().as_str(), "Periodic sync skipped");
        return;
    }
    if let Err(error) = cycle.run_cycle(SyncReason::Periodic).await {
        tracing::warn!("Periodic sync failed: {error}");
    }
}
