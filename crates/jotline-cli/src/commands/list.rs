use jotline_core::models::{EntityKind, LocalRecord};
use jotline_core::LocalStore;
use serde::Serialize;

use crate::commands::common::{format_relative_time, record_preview, short_id};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub entity: EntityKind,
    pub preview: String,
    pub created_at: i64,
    pub last_modified: i64,
    pub relative_time: String,
    pub pending: bool,
    pub local_path: Option<String>,
}

pub async fn run_list(
    store: &LocalStore,
    entity: EntityKind,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let records = store.list_active(entity, limit, 0).await?;
    let now = chrono::Utc::now().timestamp_millis();

    if as_json {
        let items = records
            .iter()
            .map(|record| to_list_item(record, now))
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_record_lines(&records, now) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn to_list_item(record: &LocalRecord, now_ms: i64) -> RecordListItem {
    RecordListItem {
        id: record.id().to_string(),
        entity: record.entity,
        preview: record_preview(record, 120),
        created_at: record.created_at,
        last_modified: record.record.last_modified,
        relative_time: format_relative_time(record.created_at, now_ms),
        pending: record.dirty,
        local_path: record.local_path.clone(),
    }
}

pub fn format_record_lines(records: &[LocalRecord], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let marker = if record.dirty { "*" } else { " " };
            format!(
                "{}{marker} {:>8}  {}",
                short_id(record.id()),
                format_relative_time(record.created_at, now_ms),
                record_preview(record, 60)
            )
        })
        .collect()
}
