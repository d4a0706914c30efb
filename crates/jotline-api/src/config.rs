use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use jotline_core::util::{is_http_url, normalize_text_option};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub auth_clock_skew: Duration,
    /// Upper bound applied to a client's requested pull `limit`.
    pub sync_max_page_size: usize,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub media_presign_rate_limit_per_window: u32,
    pub media_url_ttl: Duration,
    pub blob: Option<BlobStoreConfig>,
}

/// S3-compatible object store holding capture audio.
#[derive(Clone, PartialEq, Eq)]
pub struct BlobStoreConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for BlobStoreConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BlobStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("sync_max_page_size", &self.sync_max_page_size)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field(
                "media_presign_rate_limit_per_window",
                &self.media_presign_rate_limit_per_window,
            )
            .field("media_url_ttl", &self.media_url_ttl)
            .field("blob", &self.blob)
            .finish()
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "JOTLINE_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = PathBuf::from(value_or_default(
            &lookup,
            "JOTLINE_DATABASE_PATH",
            "jotline-server.db",
        ));

        let jwt_secret = required_trimmed(&lookup, "JOTLINE_JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "JOTLINE_JWT_SECRET must be at least 32 bytes".to_string(),
            ));
        }
        let jwt_issuer = optional_trimmed(&lookup, "JOTLINE_JWT_ISSUER");

        let auth_clock_skew_secs = bounded(&lookup, "AUTH_CLOCK_SKEW_SECS", 60, 0, 300)?;
        let sync_max_page_size = bounded(&lookup, "SYNC_MAX_PAGE_SIZE", 500, 100, 5_000)?;
        let rate_limit_window_secs = bounded(&lookup, "RATE_LIMIT_WINDOW_SECS", 60, 10, 3_600)?;
        let sync_rate_limit_per_window =
            bounded(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", 600, 1, 10_000)?;
        let media_presign_rate_limit_per_window =
            bounded(&lookup, "MEDIA_PRESIGN_RATE_LIMIT_PER_WINDOW", 120, 1, 5_000)?;
        let media_ttl_secs = bounded(&lookup, "MEDIA_SIGNED_URL_TTL_SECS", 600, 60, 3_600)?;

        let blob = parse_blob_config(&lookup)?;

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            sync_max_page_size: usize::try_from(sync_max_page_size).unwrap_or(usize::MAX),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window: u32::try_from(sync_rate_limit_per_window)
                .unwrap_or(u32::MAX),
            media_presign_rate_limit_per_window: u32::try_from(
                media_presign_rate_limit_per_window,
            )
            .unwrap_or(u32::MAX),
            media_url_ttl: Duration::from_secs(media_ttl_secs),
            blob,
        })
    }
}

fn parse_blob_config(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<BlobStoreConfig>, ConfigError> {
    let endpoint = optional_trimmed(&lookup, "BLOB_ENDPOINT");
    let bucket = optional_trimmed(&lookup, "BLOB_BUCKET");
    let access_key_id = optional_trimmed(&lookup, "BLOB_ACCESS_KEY_ID");
    let secret_access_key = optional_trimmed(&lookup, "BLOB_SECRET_ACCESS_KEY");

    let any_set = endpoint.is_some()
        || bucket.is_some()
        || access_key_id.is_some()
        || secret_access_key.is_some();
    if !any_set {
        return Ok(None);
    }

    let endpoint = endpoint.ok_or(ConfigError::MissingVar("BLOB_ENDPOINT"))?;
    if !is_http_url(&endpoint) {
        return Err(ConfigError::Invalid(
            "BLOB_ENDPOINT must start with http:// or https://".to_string(),
        ));
    }
    let bucket = bucket.ok_or(ConfigError::MissingVar("BLOB_BUCKET"))?;
    let access_key_id = access_key_id.ok_or(ConfigError::MissingVar("BLOB_ACCESS_KEY_ID"))?;
    let secret_access_key =
        secret_access_key.ok_or(ConfigError::MissingVar("BLOB_SECRET_ACCESS_KEY"))?;

    Ok(Some(BlobStoreConfig {
        endpoint: endpoint.trim_end_matches('/').to_string(),
        region: value_or_default(&lookup, "BLOB_REGION", "auto"),
        bucket,
        access_key_id,
        secret_access_key,
    }))
}

fn bounded(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
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
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn config_from(pairs: &[(&str, &str)]) -> Result<ApiConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        ApiConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_jwt_secret() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.to_string().contains("JOTLINE_JWT_SECRET"));

        let err = config_from(&[("JOTLINE_JWT_SECRET", "short")]).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn config_applies_defaults_and_bounds() {
        let config = config_from(&[("JOTLINE_JWT_SECRET", SECRET)]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.sync_max_page_size, 500);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert!(config.blob.is_none());

        let err = config_from(&[("JOTLINE_JWT_SECRET", SECRET), ("SYNC_MAX_PAGE_SIZE", "10")])
            .unwrap_err();
        assert!(err.to_string().contains("SYNC_MAX_PAGE_SIZE"));
    }

    #[test]
    fn partial_blob_config_is_rejected() {
        let err = config_from(&[
            ("JOTLINE_JWT_SECRET", SECRET),
            ("BLOB_BUCKET", "captures"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("BLOB_ENDPOINT")));
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let config = config_from(&[
            ("JOTLINE_JWT_SECRET", SECRET),
            ("BLOB_ENDPOINT", "https://s3.example.com/"),
            ("BLOB_BUCKET", "captures"),
            ("BLOB_ACCESS_KEY_ID", "access"),
            ("BLOB_SECRET_ACCESS_KEY", "sensitive-blob-secret"),
        ])
        .unwrap();

        let blob = config.blob.as_ref().unwrap();
        assert_eq!(blob.endpoint, "https://s3.example.com");
        assert_eq!(blob.region, "auto");

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains(SECRET));
        assert!(!debug_output.contains("sensitive-blob-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
