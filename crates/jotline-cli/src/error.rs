use std::io;

use jotline_core::config::ConfigError;
use jotline_core::media::BlobError;
use jotline_core::sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] jotline_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),
    #[error("No content provided")]
    EmptyContent,
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Record not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Sync finished in state `{0}`")]
    SyncFailed(&'static str),
    #[error("Sync is not configured. Set JOTLINE_ACCESS_TOKEN (and JOTLINE_API_BASE_URL) to enable `jot sync`.")]
    SyncNotConfigured,
}
