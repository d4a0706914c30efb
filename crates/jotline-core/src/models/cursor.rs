//! Sync cursor model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

use super::record::EntityKind;

/// Outcome of the most recent sync attempt for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorStatus {
    Success,
    Error,
}

impl CursorStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl FromStr for CursorStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidInput(format!("Unknown cursor status: {other}"))),
        }
    }
}

/// Per-collection sync watermark.
///
/// `last_pulled_at` only moves forward; the initial full sync is the one
/// caller that resets it to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub entity: EntityKind,
    /// Highest server timestamp from a durably applied pull page (Unix ms)
    pub last_pulled_at: i64,
    /// Server timestamp of the last acknowledged push (Unix ms)
    pub last_pushed_at: i64,
    pub last_status: Option<CursorStatus>,
    pub last_error: Option<String>,
}

impl SyncCursor {
    /// A cursor for a collection that has never synced.
    #[must_use]
    pub const fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            last_pulled_at: 0,
            last_pushed_at: 0,
            last_status: None,
            last_error: None,
        }
    }
}
