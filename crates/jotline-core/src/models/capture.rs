//! Capture model (voice or text note)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::record::SyncRecord;

/// How a capture was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    Audio,
    Text,
}

/// Local lifecycle of a capture.
///
/// `Recording` is transient: it only exists while this device is writing the
/// audio file. A capture left in that state after a restart is repaired by
/// crash recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Recording,
    Ready,
    Failed,
}

impl CaptureState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

/// Typed view over the payload of a `captures` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub kind: CaptureKind,
    pub state: CaptureState,
    /// Typed text, or the transcript once one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    /// Remote blob object key or URL for the audio payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl Capture {
    /// A typed note, ready immediately.
    pub fn text(content: impl Into<String>) -> Result<Self> {
        let content = content.into().trim().to_string();
        if content.is_empty() {
            return Err(Error::InvalidInput(
                "Capture content cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            kind: CaptureKind::Text,
            state: CaptureState::Ready,
            raw_content: Some(content),
            audio_url: None,
            duration_ms: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// A voice capture whose audio is still being written.
    #[must_use]
    pub fn recording() -> Self {
        Self {
            kind: CaptureKind::Audio,
            state: CaptureState::Recording,
            raw_content: None,
            audio_url: None,
            duration_ms: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Decode the capture payload carried by a sync record.
    pub fn from_record(record: &SyncRecord) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(record.fields.clone()))?)
    }

    /// Encode this capture as record payload fields.
    pub fn to_fields(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(fields) => Ok(fields),
            _ => Err(Error::InvalidInput(
                "Capture did not serialize to an object".to_string(),
            )),
        }
    }
}
