//! Wire types shared by the sync client and the sync server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{EntityKind, RecordId, SyncRecord};

/// Fixed page size for pull pagination.
pub const BATCH_SIZE: usize = 100;

/// Parameters of `GET /v1/sync/pull`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullQuery {
    pub entity: EntityKind,
    /// Exclusive lower bound on `last_modified` (Unix ms).
    pub since: i64,
    pub limit: usize,
    pub offset: usize,
}

/// Records of one collection split by status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub updated: Vec<SyncRecord>,
    #[serde(default)]
    pub deleted: Vec<SyncRecord>,
}

impl ChangeSet {
    /// Combined number of updated and deleted records.
    pub fn len(&self) -> usize {
        self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// One page of server changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: ChangeSet,
    /// Highest `last_modified` on this page; echoes `since` for an empty page.
    pub timestamp: i64,
    /// Number of rows newer than `since`, for progress estimates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// A record as pushed by a client. It never carries `last_modified`:
/// the server owns that field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl From<&SyncRecord> for PushRecord {
    fn from(record: &SyncRecord) -> Self {
        Self {
            id: record.id,
            fields: record.fields.clone(),
        }
    }
}

/// Pushed records of one collection split by status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushChangeSet {
    #[serde(default)]
    pub updated: Vec<PushRecord>,
    #[serde(default)]
    pub deleted: Vec<PushRecord>,
}

/// Body of `POST /v1/sync/push`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// The client's watermark for the pushed collection; the server uses it
    /// for lost-update detection.
    pub last_pulled_at: i64,
    /// Keyed by collection name.
    pub changes: BTreeMap<String, PushChangeSet>,
}

/// Response of `POST /v1/sync/push`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub synced_record_ids: Vec<RecordId>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    pub timestamp: i64,
}

/// Why a record could not be applied as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// The pushed edit was based on a version older than the server's.
    LostUpdate,
    /// The pushed edit targets a record the server already tombstoned.
    DeletedRemotely,
    /// A pulled record collided with an unpushed local edit.
    PendingLocalEdit,
}

impl ConflictType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LostUpdate => "lost_update",
            Self::DeletedRemotely => "deleted_remotely",
            Self::PendingLocalEdit => "pending_local_edit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    ServerWins,
}

/// A transient conflict value; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub entity: EntityKind,
    pub record_id: RecordId,
    pub conflict_type: ConflictType,
    #[serde(default)]
    pub resolution: Resolution,
    pub server_version: SyncRecord,
}

impl Conflict {
    pub fn server_wins(
        entity: EntityKind,
        conflict_type: ConflictType,
        server_version: SyncRecord,
    ) -> Self {
        Self {
            entity,
            record_id: server_version.id,
            conflict_type,
            resolution: Resolution::ServerWins,
            server_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_request_uses_wire_names() {
        let id = RecordId::new();
        let mut changes = BTreeMap::new();
        changes.insert(
            "todos".to_string(),
            PushChangeSet {
                updated: vec![PushRecord {
                    id,
                    fields: Map::new(),
                }],
                deleted: Vec::new(),
            },
        );
        let request = PushRequest {
            last_pulled_at: 10,
            changes,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "lastPulledAt": 10,
                "changes": { "todos": { "updated": [{ "id": id.as_str() }], "deleted": [] } }
            })
        );
    }

    #[test]
    fn push_record_drops_server_timestamp() {
        let record = SyncRecord {
            last_modified: 77,
            ..SyncRecord::new(RecordId::new(), Map::new())
        };
        let value = serde_json::to_value(PushRecord::from(&record)).unwrap();
        assert!(value.get("last_modified").is_none());
    }

    #[test]
    fn conflict_parses_from_server_payload() {
        let id = RecordId::new();
        let conflict: Conflict = serde_json::from_value(json!({
            "entity": "captures",
            "recordId": id.as_str(),
            "conflictType": "lost_update",
            "resolution": "server_wins",
            "serverVersion": { "id": id.as_str(), "last_modified": 5, "status": "active" }
        }))
        .unwrap();

        assert_eq!(conflict.entity, EntityKind::Captures);
        assert_eq!(conflict.conflict_type, ConflictType::LostUpdate);
        assert_eq!(conflict.server_version.last_modified, 5);
    }
}
