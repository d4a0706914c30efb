//! Connectivity tracking.
//!
//! The platform layer reports connectivity through [`NetworkMonitor::set_state`];
//! orchestrators observe the current state and its transitions.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, watch};

const TRANSITION_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Online,
    Offline,
    /// No report received yet.
    #[default]
    Unknown,
}

impl NetworkState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }
}

/// A change of connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTransition {
    pub previous: NetworkState,
    pub current: NetworkState,
    /// Online again after the last definite report was offline.
    pub is_reconnect: bool,
}

/// Last definite connectivity report: `None` until the first online or
/// offline report arrives.
#[derive(Debug, Default)]
struct Connectivity {
    last_connected: Option<bool>,
}

/// Shared connectivity monitor. Clones observe the same state.
#[derive(Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<NetworkState>>,
    transitions: broadcast::Sender<NetworkTransition>,
    connectivity: Arc<Mutex<Connectivity>>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor {
    pub fn new() -> Self {
        let (state, _) = watch::channel(NetworkState::Unknown);
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(state),
            transitions,
            connectivity: Arc::new(Mutex::new(Connectivity::default())),
        }
    }

    /// Record a connectivity report. Returns the transition, or `None` when
    /// the state did not change.
    pub fn set_state(&self, current: NetworkState) -> Option<NetworkTransition> {
        let mut connectivity = self
            .connectivity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let previous = self.state.send_replace(current);
        if previous == current {
            return None;
        }

        let is_reconnect =
            current == NetworkState::Online && connectivity.last_connected == Some(false);
        match current {
            NetworkState::Online => connectivity.last_connected = Some(true),
            NetworkState::Offline => connectivity.last_connected = Some(false),
            NetworkState::Unknown => {}
        }

        let transition = NetworkTransition {
            previous,
            current,
            is_reconnect,
        };
        tracing::debug!(
            previous = previous.as_str(),
            current = current.as_str(),
            is_reconnect,
            "Network state changed"
        );
        // No subscribers is fine.
        let _ = self.transitions.send(transition);
        Some(transition)
    }

    pub fn current(&self) -> NetworkState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current() == NetworkState::Online
    }

    /// Whether the last definite report was online.
    pub fn last_connected(&self) -> bool {
        self.connectivity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_connected
            .unwrap_or(false)
    }

    /// Observe the current state.
    pub fn watch(&self) -> watch::Receiver<NetworkState> {
        self.state.subscribe()
    }

    /// Receive every transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkTransition> {
        self.transitions.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_online_is_not_a_reconnect() {
        let monitor = NetworkMonitor::new();
        assert_eq!(monitor.current(), NetworkState::Unknown);

        let transition = monitor.set_state(NetworkState::Online).unwrap();
        assert!(!transition.is_reconnect);
        assert!(monitor.is_online());
        assert!(monitor.last_connected());
    }

    #[test]
    fn offline_then_online_is_a_reconnect() {
        let monitor = NetworkMonitor::new();
        monitor.set_state(NetworkState::Online);
        monitor.set_state(NetworkState::Offline);
        assert!(!monitor.last_connected());

        let transition = monitor.set_state(NetworkState::Online).unwrap();
        assert!(transition.is_reconnect);
        assert_eq!(transition.previous, NetworkState::Offline);
    }

    #[test]
    fn unknown_blip_while_connected_is_not_a_reconnect() {
        let monitor = NetworkMonitor::new();
        monitor.set_state(NetworkState::Online);
        monitor.set_state(NetworkState::Unknown);

        let transition = monitor.set_state(NetworkState::Online).unwrap();
        assert!(!transition.is_reconnect);
    }

    #[test]
    fn repeated_report_is_not_a_transition() {
        let monitor = NetworkMonitor::new();
        monitor.set_state(NetworkState::Offline);
        assert!(monitor.set_state(NetworkState::Offline).is_none());
    }

    #[tokio::test]
    async fn transitions_are_broadcast() {
        let monitor = NetworkMonitor::new();
        let mut transitions = monitor.subscribe();
        let mut state = monitor.watch();

        monitor.set_state(NetworkState::Offline);
        monitor.set_state(NetworkState::Online);

        assert_eq!(transitions.recv().await.unwrap().current, NetworkState::Offline);
        assert!(transitions.recv().await.unwrap().is_reconnect);
        assert_eq!(*state.borrow_and_update(), NetworkState::Online);
    }
}
