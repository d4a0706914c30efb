use std::path::PathBuf;
use std::sync::Arc;

use jotline_core::config::ClientConfig;
use jotline_core::media::{HttpBlobSource, LazyBlobDownloader};
use jotline_core::models::EntityKind;
use jotline_core::LocalStore;

use crate::commands::common::{access_token, resolve_record};
use crate::error::CliError;

pub fn downloader(config: &ClientConfig, store: LocalStore) -> Result<LazyBlobDownloader, CliError> {
    let source = HttpBlobSource::new(&config.api_base_url, config.http_timeout)?
        .with_access_token(access_token(config)?);
    Ok(LazyBlobDownloader::new(
        store,
        Arc::new(source),
        config.blob_cache_dir(),
    ))
}

pub async fn run_fetch_audio(
    downloader: &LazyBlobDownloader,
    store: &LocalStore,
    query: &str,
) -> Result<PathBuf, CliError> {
    let record = resolve_record(store, EntityKind::Captures, query).await?;
    Ok(downloader.ensure_local(&record.id()).await?)
}
