//! Startup repair of captures left mid-recording by a crash.

use std::path::PathBuf;

use crate::db::{RecordRepository, SqliteRecordRepository};
use crate::models::{CaptureState, EntityKind, LocalRecord, RecordId};
use crate::services::LocalStore;

/// What happened to one interrupted capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The audio file survived; the capture is ready.
    Recovered { id: RecordId, path: PathBuf },
    /// The capture could not be salvaged and was marked failed.
    Failed { id: RecordId, reason: String },
}

impl RecoveryOutcome {
    pub const fn id(&self) -> RecordId {
        match self {
            Self::Recovered { id, .. } | Self::Failed { id, .. } => *id,
        }
    }

    pub const fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

pub struct CrashRecovery {
    store: LocalStore,
}

impl CrashRecovery {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Settle every capture still in `recording`.
    ///
    /// A capture whose audio file exists and is non-empty becomes `ready`;
    /// any other becomes `failed`. Both are marked for push. Yields exactly
    /// one outcome per interrupted capture and never fails.
    pub async fn recover_incomplete_recordings(&self) -> Vec<RecoveryOutcome> {
        let stuck = match self
            .store
            .read(|conn| {
                SqliteRecordRepository::new(conn).list_captures_in_state(CaptureState::Recording)
            })
            .await
        {
            Ok(stuck) => stuck,
            Err(error) => {
                tracing::error!("Failed to scan for interrupted recordings: {error}");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::with_capacity(stuck.len());
        for record in stuck {
            outcomes.push(self.recover(record).await);
        }

        let recovered = outcomes.iter().filter(|outcome| outcome.is_recovered()).count();
        if !outcomes.is_empty() {
            tracing::info!(
                recovered,
                failed = outcomes.len() - recovered,
                "Crash recovery finished"
            );
        }
        outcomes
    }

    async fn recover(&self, record: LocalRecord) -> RecoveryOutcome {
        let id = record.id();
        let verdict = match record.local_path.as_deref() {
            None => Err("no local audio file recorded".to_string()),
            Some(path) => match tokio::fs::metadata(path).await {
                Ok(metadata) if metadata.is_file() && metadata.len() > 0 => {
                    Ok(PathBuf::from(path))
                }
                Ok(metadata) if metadata.is_file() => Err(format!("audio file {path} is empty")),
                Ok(_) => Err(format!("{path} is not a regular file")),
                Err(error) => Err(format!("audio file {path} is unreadable: {error}")),
            },
        };

        let state = if verdict.is_ok() {
            CaptureState::Ready
        } else {
            CaptureState::Failed
        };
        let stored = self
            .store
            .transaction(|conn| SqliteRecordRepository::new(conn).set_capture_state(&id, state))
            .await;
        if stored.is_ok() {
            self.store.notify(EntityKind::Captures, id);
        }

        match (verdict, stored) {
            (Ok(path), Ok(_)) => {
                tracing::debug!(record_id = %id, "Recovered interrupted recording");
                RecoveryOutcome::Recovered { id, path }
            }
            (Err(reason), Ok(_)) => {
                tracing::warn!(record_id = %id, "Interrupted recording lost: {reason}");
                RecoveryOutcome::Failed { id, reason }
            }
            (_, Err(error)) => {
                tracing::warn!(record_id = %id, "Failed to persist recovery: {error}");
                RecoveryOutcome::Failed {
                    id,
                    reason: format!("could not persist recovery: {error}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Capture;
    use pretty_assertions::assert_eq;

    async fn stuck_capture(store: &LocalStore, path: Option<&str>) -> RecordId {
        store
            .create_capture(&Capture::recording(), path)
            .await
            .unwrap()
            .id()
    }

    async fn state_of(store: &LocalStore, id: RecordId) -> (CaptureState, bool) {
        let record = store
            .get_record(EntityKind::Captures, &id)
            .await
            .unwrap()
            .unwrap();
        (Capture::from_record(&record.record).unwrap().state, record.dirty)
    }

    #[tokio::test]
    async fn every_interrupted_capture_gets_exactly_one_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let audio = tmp.path().join("kept.m4a");
        std::fs::write(&audio, b"audio-bytes").unwrap();
        let empty = tmp.path().join("empty.m4a");
        std::fs::write(&empty, b"").unwrap();
        let missing = tmp.path().join("missing.m4a");

        let store = LocalStore::open_in_memory().unwrap();
        let kept = stuck_capture(&store, audio.to_str()).await;
        let truncated = stuck_capture(&store, empty.to_str()).await;
        let gone = stuck_capture(&store, missing.to_str()).await;
        let pathless = stuck_capture(&store, None).await;
        store
            .create_capture(&Capture::text("already fine").unwrap(), None)
            .await
            .unwrap();

        let outcomes = CrashRecovery::new(store.clone())
            .recover_incomplete_recordings()
            .await;

        assert_eq!(outcomes.len(), 4);
        let mut ids: Vec<RecordId> = outcomes.iter().map(RecoveryOutcome::id).collect();
        ids.sort();
        let mut expected = vec![kept, truncated, gone, pathless];
        expected.sort();
        assert_eq!(ids, expected);

        assert_eq!(
            outcomes.iter().find(|outcome| outcome.id() == kept),
            Some(&RecoveryOutcome::Recovered { id: kept, path: audio })
        );
        assert_eq!(state_of(&store, kept).await, (CaptureState::Ready, true));
        for id in [truncated, gone, pathless] {
            assert_eq!(state_of(&store, id).await, (CaptureState::Failed, true));
        }
    }

    #[tokio::test]
    async fn deleted_recording_is_settled_by_its_audio_file() {
        let tmp = tempfile::tempdir().unwrap();
        let audio = tmp.path().join("deleted.m4a");
        std::fs::write(&audio, b"audio-bytes").unwrap();

        let store = LocalStore::open_in_memory().unwrap();
        let id = stuck_capture(&store, audio.to_str()).await;
        store.delete_record(EntityKind::Captures, &id).await.unwrap();
        let recovery = CrashRecovery::new(store.clone());

        let outcomes = recovery.recover_incomplete_recordings().await;

        assert_eq!(outcomes, vec![RecoveryOutcome::Recovered { id, path: audio }]);
        assert_eq!(state_of(&store, id).await, (CaptureState::Ready, true));
        let stored = store
            .get_record(EntityKind::Captures, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.record.status, crate::models::RecordStatus::Deleted);
        assert!(recovery.recover_incomplete_recordings().await.is_empty());
    }

    #[tokio::test]
    async fn second_run_finds_nothing() {
        let store = LocalStore::open_in_memory().unwrap();
        stuck_capture(&store, None).await;
        let recovery = CrashRecovery::new(store);

        assert_eq!(recovery.recover_incomplete_recordings().await.len(), 1);
        assert!(recovery.recover_incomplete_recordings().await.is_empty());
    }
}
