//! Fetch capture audio on first access.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::{EntityKind, LocalRecord, RecordId};
use crate::services::LocalStore;

use super::{BlobError, BlobSource};

const DEFAULT_EXTENSION: &str = "bin";

/// Downloads capture audio into a local cache the first time it is needed.
///
/// Concurrent calls for the same record share one download.
pub struct LazyBlobDownloader {
    store: LocalStore,
    source: Arc<dyn BlobSource>,
    cache_dir: PathBuf,
    in_flight: Mutex<HashMap<RecordId, Arc<tokio::sync::Mutex<()>>>>,
}

impl LazyBlobDownloader {
    pub fn new(store: LocalStore, source: Arc<dyn BlobSource>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            source,
            cache_dir: cache_dir.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the capture's audio on disk, downloading it when missing.
    pub async fn ensure_local(&self, id: &RecordId) -> Result<PathBuf, BlobError> {
        if let Some(path) = self.cached(id).await? {
            return Ok(path);
        }

        let gate = self.gate(id);
        let result = {
            let _held = gate.lock().await;
            // Another caller may have finished the download while we waited.
            match self.cached(id).await {
                Ok(Some(path)) => Ok(path),
                Ok(None) => self.download(id).await,
                Err(error) => Err(error),
            }
        };
        drop(gate);
        self.release(id);
        result
    }

    fn gate(&self, id: &RecordId) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(in_flight.entry(*id).or_default())
    }

    fn release(&self, id: &RecordId) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(id)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            in_flight.remove(id);
        }
    }

    async fn record(&self, id: &RecordId) -> Result<LocalRecord, BlobError> {
        self.store
            .get_record(EntityKind::Captures, id)
            .await?
            .ok_or_else(|| BlobError::NotFound(id.to_string()))
    }

    async fn cached(&self, id: &RecordId) -> Result<Option<PathBuf>, BlobError> {
        let record = self.record(id).await?;
        let Some(path) = record.local_path.map(PathBuf::from) else {
            return Ok(None);
        };
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(path)),
            _ => Ok(None),
        }
    }

    async fn download(&self, id: &RecordId) -> Result<PathBuf, BlobError> {
        let record = self.record(id).await?;
        let object_key = record
            .record
            .fields
            .get("audio_url")
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| BlobError::NoRemoteBlob(id.to_string()))?
            .to_string();

        tracing::debug!(record_id = %id, "Downloading capture audio");
        let blob = self.source.download(&object_key).await?;

        let extension = extension_for(&object_key, blob.content_type.as_deref());
        let dir = self.cache_dir.join(EntityKind::Captures.as_str());
        tokio::fs::create_dir_all(&dir).await?;
        let target = dir.join(format!("{id}.{extension}"));
        let partial = dir.join(format!(".{id}.{extension}.part"));

        tokio::fs::write(&partial, &blob.bytes).await?;
        if let Err(error) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(error.into());
        }

        let target_str = target.to_string_lossy();
        self.store
            .set_local_path(EntityKind::Captures, id, Some(target_str.as_ref()))
            .await?;
        tracing::info!(record_id = %id, bytes = blob.bytes.len(), "Cached capture audio");
        Ok(target)
    }
}

fn extension_for(object_key: &str, content_type: Option<&str>) -> String {
    let from_key = Path::new(object_key)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    if let Some(ext) = from_key {
        return ext.to_ascii_lowercase();
    }

    let mime = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase());
    match mime.as_deref() {
        Some("audio/mp4" | "audio/m4a" | "audio/x-m4a") => "m4a",
        Some("audio/mpeg") => "mp3",
        Some("audio/wav" | "audio/x-wav" | "audio/wave") => "wav",
        Some("audio/ogg") => "ogg",
        Some("audio/webm") => "webm",
        _ => DEFAULT_EXTENSION,
    }
    .to_string()
}
