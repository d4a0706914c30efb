use std::sync::Arc;
use std::time::Duration;

use jotline_core::config::ClientConfig;
use jotline_core::network::{NetworkMonitor, NetworkState};
use jotline_core::orchestrator::{InitialSyncOrchestrator, PeriodicOrchestrator, ReconnectOrchestrator};
use jotline_core::recovery::CrashRecovery;
use jotline_core::sync::{SyncCycle, SyncEngine, SyncReason};
use tokio::time::{interval, MissedTickBehavior};

use crate::error::CliError;

/// Whether the sync server answers its health check.
pub async fn probe_health(client: &reqwest::Client, health_url: &str) -> bool {
    match client.get(health_url).send().await {
        Ok(response) => response.status().is_success(),
        Err(error) => {
            tracing::debug!("Health probe failed: {error}");
            false
        }
    }
}

pub async fn run_watch(
    config: &ClientConfig,
    engine: SyncEngine,
    probe_every: Duration,
    user: Option<&str>,
) -> Result<(), CliError> {
    let recovered = CrashRecovery::new(engine.store().clone())
        .recover_incomplete_recordings()
        .await;
    if !recovered.is_empty() {
        tracing::info!(count = recovered.len(), "Settled interrupted recordings");
    }

    let client = reqwest::Client::builder()
        .timeout(config.http_timeout.min(probe_every.max(Duration::from_secs(1))))
        .build()
        .map_err(|error| CliError::Sync(error.into()))?;
    let health_url = format!("{}/healthz", config.api_base_url);

    let monitor = NetworkMonitor::new();
    let online = probe_health(&client, &health_url).await;
    monitor.set_state(if online {
        NetworkState::Online
    } else {
        NetworkState::Offline
    });

    if online {
        if let Some(user_id) = user {
            if let Err(error) = InitialSyncOrchestrator::new(engine.clone())
                .run_if_needed(user_id)
                .await
            {
                tracing::warn!("Initial sync failed: {error}");
            }
        }
        if let Err(error) = engine.run_cycle(SyncReason::Manual).await {
            tracing::warn!("Startup sync failed: {error}");
        }
    }

    let cycle: Arc<dyn SyncCycle> = Arc::new(engine.clone());
    let reconnect =
        ReconnectOrchestrator::spawn(monitor.clone(), Arc::clone(&cycle), config.reconnect_debounce);
    let periodic = PeriodicOrchestrator::new(monitor.clone(), cycle, config.periodic_sync_interval);
    periodic.start();

    let mut states = engine.state();
    let reporter = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            println!("sync: {}", state.as_str());
        }
    });

    println!("Watching {} (Ctrl-C to stop)", config.api_base_url);
    let mut probes = interval(probe_every);
    probes.set_missed_tick_behavior(MissedTickBehavior::Delay);
    probes.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    tracing::warn!("Failed to listen for Ctrl-C: {error}");
                }
                break;
            }
            _ = probes.tick() => {
                let online = probe_health(&client, &health_url).await;
                if let Some(transition) = monitor.set_state(if online {
                    NetworkState::Online
                } else {
                    NetworkState::Offline
                }) {
                    println!("network: {}", transition.current.as_str());
                }
            }
        }
    }

    periodic.stop();
    reconnect.stop();
    reporter.abort();
    Ok(())
}
