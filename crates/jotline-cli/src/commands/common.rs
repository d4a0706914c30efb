use std::collections::HashMap;
use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use jotline_core::config::ClientConfig;
use jotline_core::models::{Capture, EntityKind, LocalRecord, RecordId};
use jotline_core::sync::{HttpSyncTransport, SyncEngine};
use jotline_core::util::normalize_text_option;
use jotline_core::LocalStore;

use crate::error::CliError;

const ID_SCAN_PAGE: usize = 500;

/// Client configuration from the environment, with `--data-dir` taking
/// precedence and the platform data directory as the fallback.
pub fn load_config(data_dir: Option<PathBuf>) -> Result<ClientConfig, CliError> {
    let values: HashMap<String, String> = env::vars().collect();
    config_from_lookup(
        |name| values.get(name).cloned(),
        data_dir,
        default_data_dir(),
    )
}

pub fn config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
    data_dir: Option<PathBuf>,
    fallback_dir: Option<PathBuf>,
) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_lookup(&lookup)?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    } else if normalize_text_option(lookup("JOTLINE_DATA_DIR")).is_none() {
        if let Some(dir) = fallback_dir {
            config.data_dir = dir;
        }
    }
    Ok(config)
}

pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("jotline"))
}

pub async fn open_store(config: &ClientConfig) -> Result<LocalStore, CliError> {
    tokio::fs::create_dir_all(&config.data_dir).await?;
    Ok(LocalStore::open_path(config.database_path())?)
}

pub fn access_token(config: &ClientConfig) -> Result<String, CliError> {
    config
        .access_token
        .clone()
        .ok_or(CliError::SyncNotConfigured)
}

pub fn sync_engine(config: &ClientConfig, store: LocalStore) -> Result<SyncEngine, CliError> {
    let transport = HttpSyncTransport::new(&config.api_base_url, config.http_timeout)?
        .with_access_token(access_token(config)?);
    Ok(SyncEngine::new(
        store,
        Arc::new(transport),
        config.retry_policy(),
    ))
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn resolve_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }
    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }
    Err(CliError::EmptyContent)
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

/// Find an active record by full id or unique id prefix.
pub async fn resolve_record(
    store: &LocalStore,
    entity: EntityKind,
    query: &str,
) -> Result<LocalRecord, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    if let Ok(id) = query.parse::<RecordId>() {
        if let Some(record) = store.get_record(entity, &id).await? {
            return Ok(record);
        }
    }

    let mut matches = Vec::new();
    let mut offset = 0;
    loop {
        let page = store.list_active(entity, ID_SCAN_PAGE, offset).await?;
        let count = page.len();
        matches.extend(
            page.into_iter()
                .filter(|record| record.id().as_str().starts_with(query)),
        );
        if count < ID_SCAN_PAGE {
            break;
        }
        offset += count;
    }

    match matches.len() {
        0 => Err(CliError::RecordNotFound(query.to_string())),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|record| short_id(record.id()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousRecordId(format!(
                "Record id prefix `{query}` is ambiguous. Matches include: {options}"
            )))
        }
    }
}

pub fn short_id(id: RecordId) -> String {
    id.as_str().chars().take(13).collect()
}

/// One-line summary of a record's payload.
pub fn record_preview(record: &LocalRecord, max_chars: usize) -> String {
    let text = if record.entity == EntityKind::Captures {
        match Capture::from_record(&record.record) {
            Ok(capture) => capture.raw_content.unwrap_or_else(|| {
                format!("[{} audio]", capture.state.as_str())
            }),
            Err(_) => String::new(),
        }
    } else {
        ["text", "title", "body"]
            .iter()
            .find_map(|key| record.record.fields.get(*key).and_then(|value| value.as_str()))
            .unwrap_or_default()
            .to_string()
    };

    let first_line = text.lines().next().unwrap_or_default();
    let mut preview: String = first_line.chars().take(max_chars).collect();
    if first_line.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
