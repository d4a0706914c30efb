//! Client runtime configuration from environment variables.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::sync::RetryPolicy;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_DATA_DIR: &str = ".jotline";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub access_token: Option<String>,
    /// Holds the local database and the blob cache.
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
    pub retry_max_attempts: u32,
    pub periodic_sync_interval: Duration,
    pub reconnect_debounce: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("data_dir", &self.data_dir)
            .field("http_timeout", &self.http_timeout)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("periodic_sync_interval", &self.periodic_sync_interval)
            .field("reconnect_debounce", &self.reconnect_debounce)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = value_or_default(&lookup, "JOTLINE_API_BASE_URL", DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        if !is_http_url(&api_base_url) {
            return Err(ConfigError::Invalid(
                "JOTLINE_API_BASE_URL must start with http:// or https://".to_string(),
            ));
        }

        let access_token = normalize_text_option(lookup("JOTLINE_ACCESS_TOKEN"));
        let data_dir = PathBuf::from(value_or_default(&lookup, "JOTLINE_DATA_DIR", DEFAULT_DATA_DIR));

        let http_timeout_secs = bounded_u64(&lookup, "JOTLINE_HTTP_TIMEOUT_SECS", 30, 1, 300)?;
        let retry_max_attempts = bounded_u64(&lookup, "JOTLINE_RETRY_MAX_ATTEMPTS", 5, 1, 20)?;
        let periodic_sync_secs =
            bounded_u64(&lookup, "JOTLINE_PERIODIC_SYNC_SECS", 900, 60, 86_400)?;
        let reconnect_debounce_secs =
            bounded_u64(&lookup, "JOTLINE_RECONNECT_DEBOUNCE_SECS", 5, 0, 300)?;

        Ok(Self {
            api_base_url,
            access_token,
            data_dir,
            http_timeout: Duration::from_secs(http_timeout_secs),
            retry_max_attempts: u32::try_from(retry_max_attempts).unwrap_or(u32::MAX),
            periodic_sync_interval: Duration::from_secs(periodic_sync_secs),
            reconnect_debounce: Duration::from_secs(reconnect_debounce_secs),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("jotline.db")
    }

    pub fn blob_cache_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            ..RetryPolicy::default()
        }
    }
}

fn bounded_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"))
    })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    normalize_text_option(lookup(name)).unwrap_or_else(|| default.to_string())
}
