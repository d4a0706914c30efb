//! In-memory sync server used by engine and orchestrator tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::{SyncError, SyncResult};
use super::protocol::{
    ChangeSet, Conflict, ConflictType, PullQuery, PullResponse, PushRequest, PushResponse,
};
use super::transport::SyncTransport;
use crate::models::{EntityKind, RecordId, RecordStatus, SyncRecord};

#[derive(Default)]
struct MockState {
    clock: i64,
    rows: Vec<(EntityKind, SyncRecord)>,
    pulls: Vec<PullQuery>,
    pushes: Vec<PushRequest>,
    pull_failures: VecDeque<SyncError>,
    /// Failures keyed by the 1-based pull request number they answer.
    scheduled_pull_failures: Vec<(usize, SyncError)>,
    push_failures: VecDeque<SyncError>,
}

impl MockState {
    fn stamp(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn find(&self, entity: EntityKind, id: RecordId) -> Option<&SyncRecord> {
        self.rows
            .iter()
            .find(|(row_entity, row)| *row_entity == entity && row.id == id)
            .map(|(_, row)| row)
    }

    fn upsert(&mut self, entity: EntityKind, record: SyncRecord) {
        match self
            .rows
            .iter_mut()
            .find(|(row_entity, row)| *row_entity == entity && row.id == record.id)
        {
            Some((_, row)) => *row = record,
            None => self.rows.push((entity, record)),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Write a record on the server side, as another device would.
    pub(crate) fn server_write(
        &self,
        entity: EntityKind,
        id: RecordId,
        fields: Map<String, Value>,
        status: RecordStatus,
    ) -> SyncRecord {
        let mut state = self.state.lock().unwrap();
        let record = SyncRecord {
            id,
            last_modified: state.stamp(),
            status,
            fields,
        };
        state.upsert(entity, record.clone());
        record
    }

    pub(crate) fn seed(&self, entity: EntityKind, count: usize) {
        for index in 0..count {
            let mut fields = Map::new();
            fields.insert("title".to_string(), Value::from(format!("seed {index}")));
            self.server_write(entity, RecordId::new(), fields, RecordStatus::Active);
        }
    }

    pub(crate) fn record(&self, entity: EntityKind, id: RecordId) -> Option<SyncRecord> {
        self.state.lock().unwrap().find(entity, id).cloned()
    }

    pub(crate) fn fail_next_pull(&self, error: SyncError) {
        self.state.lock().unwrap().pull_failures.push_back(error);
    }

    /// Fail the `request`-th pull (counting from 1) made to this server.
    pub(crate) fn fail_pull_number(&self, request: usize, error: SyncError) {
        self.state
            .lock()
            .unwrap()
            .scheduled_pull_failures
            .push((request, error));
    }

    pub(crate) fn fail_next_push(&self, error: SyncError) {
        self.state.lock().unwrap().push_failures.push_back(error);
    }

    pub(crate) fn pulls(&self) -> Vec<PullQuery> {
        self.state.lock().unwrap().pulls.clone()
    }

    pub(crate) fn pushes(&self) -> Vec<PushRequest> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub(crate) fn calls(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.pulls.len() + state.pushes.len()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn pull(&self, query: &PullQuery) -> SyncResult<PullResponse> {
        let mut state = self.state.lock().unwrap();
        state.pulls.push(*query);
        if let Some(error) = state.pull_failures.pop_front() {
            return Err(error);
        }
        let request = state.pulls.len();
        if let Some(index) = state
            .scheduled_pull_failures
            .iter()
            .position(|(number, _)| *number == request)
        {
            return Err(state.scheduled_pull_failures.remove(index).1);
        }

        let mut matching: Vec<&SyncRecord> = state
            .rows
            .iter()
            .filter(|(entity, row)| *entity == query.entity && row.last_modified > query.since)
            .map(|(_, row)| row)
            .collect();
        matching.sort_by_key(|row| (row.last_modified, row.id));

        let total = matching.len() as u64;
        let page: Vec<SyncRecord> = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        let timestamp = page
            .iter()
            .map(|row| row.last_modified)
            .max()
            .unwrap_or(query.since);
        let (deleted, updated) = page.into_iter().partition(SyncRecord::is_deleted);

        Ok(PullResponse {
            changes: ChangeSet { updated, deleted },
            timestamp,
            total: Some(total),
        })
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let mut state = self.state.lock().unwrap();
        state.pushes.push(request.clone());
        if let Some(error) = state.push_failures.pop_front() {
            return Err(error);
        }

        let mut response = PushResponse::default();
        for (name, changes) in &request.changes {
            let entity: EntityKind = name
                .parse()
                .map_err(|_| SyncError::Validation(format!("unknown entity {name}")))?;
            let records = changes
                .updated
                .iter()
                .map(|record| (record, RecordStatus::Active))
                .chain(changes.deleted.iter().map(|record| (record, RecordStatus::Deleted)));

            for (record, status) in records {
                if let Some(existing) = state.find(entity, record.id) {
                    if existing.last_modified > request.last_pulled_at {
                        let conflict_type = if existing.is_deleted() {
                            ConflictType::DeletedRemotely
                        } else {
                            ConflictType::LostUpdate
                        };
                        response.conflicts.push(Conflict::server_wins(
                            entity,
                            conflict_type,
                            existing.clone(),
                        ));
                        continue;
                    }
                }

                let stored = SyncRecord {
                    id: record.id,
                    last_modified: state.stamp(),
                    status,
                    fields: record.fields.clone(),
                };
                state.upsert(entity, stored);
                response.synced_record_ids.push(record.id);
            }
        }
        response.timestamp = state.clock;
        Ok(response)
    }
}

pub(crate) fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
