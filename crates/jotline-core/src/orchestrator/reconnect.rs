//! Debounced sync after connectivity comes back.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};

use crate::network::{NetworkMonitor, NetworkState, NetworkTransition};
use crate::sync::{SyncCycle, SyncReason};

pub const DEFAULT_RECONNECT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Runs one sync cycle once the device has stayed online for the debounce
/// window after a reconnect. Any state change inside the window cancels the
/// pending cycle; a new reconnect starts the window again.
pub struct ReconnectOrchestrator {
    task: JoinHandle<()>,
}

impl ReconnectOrchestrator {
    pub fn spawn(monitor: NetworkMonitor, cycle: Arc<dyn SyncCycle>, debounce: Duration) -> Self {
        let transitions = monitor.subscribe();
        let task = tokio::spawn(run(monitor, transitions, cycle, debounce));
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ReconnectOrchestrator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn wait_for(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn run(
    monitor: NetworkMonitor,
    mut transitions: broadcast::Receiver<NetworkTransition>,
    cycle: Arc<dyn SyncCycle>,
    debounce: Duration,
) {
    let mut timer: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            event = transitions.recv() => match event {
                Ok(transition) => {
                    if transition.is_reconnect {
                        tracing::debug!("Reconnected; sync scheduled after debounce");
                        timer = Some(Box::pin(sleep(debounce)));
                    } else if timer.take().is_some() {
                        tracing::debug!(
                            state = transition.current.as_str(),
                            "Pending reconnect sync cancelled"
                        );
                    }
                    if transition.current == NetworkState::Offline {
                        cycle.went_offline();
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed network transitions");
                    timer = None;
                }
                Err(RecvError::Closed) => break,
            },
            () = wait_for(&mut timer) => {
                timer = None;
                if !monitor.is_online() {
                    continue;
                }
                if let Err(error) = cycle.run_cycle(SyncReason::Reconnect).await {
                    tracing::warn!("Reconnect sync failed: {error}");
                }
            }
        }
    }
}
