use jotline_core::models::{Capture, EntityKind, LocalRecord};
use jotline_core::LocalStore;
use serde_json::{Map, Value};

use crate::error::CliError;

/// Store `content` in `entity`, queued for the next push.
pub async fn add_record(
    store: &LocalStore,
    entity: EntityKind,
    content: String,
) -> Result<LocalRecord, CliError> {
    if entity == EntityKind::Captures {
        let capture = Capture::text(content)?;
        return Ok(store.create_capture(&capture, None).await?);
    }

    let mut fields = Map::new();
    fields.insert("text".to_string(), Value::String(content));
    fields.insert(
        "created_at".to_string(),
        Value::from(chrono::Utc::now().timestamp_millis()),
    );
    Ok(store.create_record(entity, fields).await?)
}
