use std::time::Duration;

use aws_credential_types::Credentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use jotline_core::media::PresignedOperation;

use crate::config::{ApiConfig, BlobStoreConfig};
use crate::error::AppError;

/// Signs short-lived download URLs for capture audio in an S3-compatible
/// bucket.
#[derive(Clone)]
pub struct BlobPresignService {
    bucket: String,
    ttl: Duration,
    client: Client,
}

impl BlobPresignService {
    pub fn from_config(config: &ApiConfig) -> Option<Self> {
        config
            .blob
            .clone()
            .map(|blob| Self::new(blob, config.media_url_ttl))
    }

    pub fn new(config: BlobStoreConfig, ttl: Duration) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "jotline-api-blob",
        );

        let shared_config = aws_sdk_s3::Config::builder()
            .region(Region::new(config.region))
            .endpoint_url(config.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            bucket: config.bucket,
            ttl,
            client: Client::from_conf(shared_config),
        }
    }

    pub async fn presign_download(&self, object_key: &str) -> Result<PresignedOperation, AppError> {
        let object_key = normalize_object_key(object_key)?;
        let config = PresigningConfig::expires_in(self.ttl).map_err(|error| {
            AppError::internal(format!("Invalid presign TTL: {}", sanitize(&error)))
        })?;
        let operation = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .presigned(config)
            .await
            .map_err(|error| {
                AppError::external(format!(
                    "Failed to presign download URL: {}",
                    sanitize(&error)
                ))
            })?;
        Ok(PresignedOperation {
            method: operation.method().to_string(),
            url: operation.uri().to_string(),
            headers: operation
                .headers()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        })
    }
}

/// Object keys are relative paths inside the bucket; traversal is refused.
pub fn normalize_object_key(raw: &str) -> Result<String, AppError> {
    let key = raw.trim().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(AppError::bad_request("object_key is required"));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(AppError::bad_request(
            "object_key must not contain path traversal segments",
        ));
    }
    Ok(key)
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> BlobPresignService {
        BlobPresignService::new(
            BlobStoreConfig {
                endpoint: "https://s3.example.com".to_string(),
                region: "us-east-1".to_string(),
                bucket: "captures".to_string(),
                access_key_id: "access".to_string(),
                secret_access_key: "secret".to_string(),
            },
            Duration::from_secs(600),
        )
    }

    #[test]
    fn normalize_object_key_rejects_empty_or_parent_segments() {
        assert!(normalize_object_key(" ").is_err());
        assert!(normalize_object_key("../a").is_err());
        assert!(normalize_object_key("captures/../../etc").is_err());
    }

    #[test]
    fn normalize_object_key_trims_prefix_slash() {
        assert_eq!(
            normalize_object_key("/captures/user/voice.m4a").unwrap(),
            "captures/user/voice.m4a"
        );
    }

    #[tokio::test]
    async fn presigned_download_targets_bucket_object() {
        let operation = service()
            .presign_download("captures/user/voice.m4a")
            .await
            .unwrap();
        assert_eq!(operation.method, "GET");
        assert!(operation
            .url
            .starts_with("https://s3.example.com/captures/captures/user/voice.m4a?"));
        assert!(operation.url.contains("X-Amz-Signature="));
    }
}
