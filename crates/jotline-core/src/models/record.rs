//! Syncable record model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A client-assigned, globally unique record identifier (UUID v7, time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Entity collections that take part in sync.
///
/// Each collection is an independent aggregate with its own cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Captures,
    Thoughts,
    Ideas,
    Todos,
}

impl EntityKind {
    /// Every tracked collection, in sync order.
    pub const ALL: [Self; 4] = [Self::Captures, Self::Thoughts, Self::Ideas, Self::Todos];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Captures => "captures",
            Self::Thoughts => "thoughts",
            Self::Ideas => "ideas",
            Self::Todos => "todos",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "captures" => Ok(Self::Captures),
            "thoughts" => Ok(Self::Thoughts),
            "ideas" => Ok(Self::Ideas),
            "todos" => Ok(Self::Todos),
            other => Err(Error::InvalidInput(format!("Unknown entity: {other}"))),
        }
    }
}

/// Record lifecycle status. Deletion is a status flip, never a row removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Active,
    Deleted,
}

impl RecordStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "deleted" => Ok(Self::Deleted),
            other => Err(Error::InvalidInput(format!("Unknown record status: {other}"))),
        }
    }
}

/// A record as it travels on the sync wire.
///
/// Entity payload fields are flattened next to the sync envelope, so a
/// capture serializes as `{"id": .., "last_modified": .., "status": .., "kind": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: RecordId,
    /// Server-stamped timestamp (Unix ms). Zero for records never acknowledged.
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SyncRecord {
    /// Build an active record with the given payload fields.
    pub fn new(id: RecordId, fields: Map<String, Value>) -> Self {
        Self {
            id,
            last_modified: 0,
            status: RecordStatus::Active,
            fields,
        }
    }

    pub const fn is_deleted(&self) -> bool {
        matches!(self.status, RecordStatus::Deleted)
    }
}

/// A record as stored on this device, including local-only bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    pub entity: EntityKind,
    pub record: SyncRecord,
    /// Set by every local mutation, cleared by a push acknowledgment.
    pub dirty: bool,
    /// Local mutation counter used to detect edits racing a push.
    pub revision: i64,
    /// Cached blob path on this device. Never part of the sync payload.
    pub local_path: Option<String>,
    /// Local insertion time (Unix ms).
    pub created_at: i64,
}

impl LocalRecord {
    pub const fn id(&self) -> RecordId {
        self.record.id
    }
}

/// Notification emitted whenever a local record changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordChange {
    pub entity: EntityKind,
    pub id: RecordId,
}
