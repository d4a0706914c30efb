//! Remote blob access through backend-issued presigned URLs.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::BlobError;
use crate::util::{api_error_message, normalize_base_url, normalize_text_option};

/// A presigned request returned by the API service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedOperation {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

/// Envelope of `GET /v1/media/presign/download`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignResponse {
    pub operation: PresignedOperation,
}

/// Downloaded blob bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobBytes {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Where audio blobs come from.
#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Ask the backend for a short-lived download request for `object_key`.
    async fn presigned_download(&self, object_key: &str) -> Result<PresignedOperation, BlobError>;

    /// Execute a presigned request.
    async fn fetch(&self, operation: &PresignedOperation) -> Result<BlobBytes, BlobError>;

    async fn download(&self, object_key: &str) -> Result<BlobBytes, BlobError> {
        let operation = self.presigned_download(object_key).await?;
        self.fetch(&operation).await
    }
}

/// HTTP [`BlobSource`] backed by the Jotline API service.
#[derive(Clone)]
pub struct HttpBlobSource {
    base_url: String,
    client: reqwest::Client,
    access_token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for HttpBlobSource {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpBlobSource")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpBlobSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BlobError> {
        let base_url = normalize_base_url(base_url).map_err(BlobError::Fetch)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| BlobError::Fetch(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            client,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    #[must_use]
    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        self.set_access_token(Some(token.into()));
        self
    }

    pub fn set_access_token(&self, token: Option<String>) {
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = normalize_text_option(token);
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BlobSource for HttpBlobSource {
    async fn presigned_download(&self, object_key: &str) -> Result<PresignedOperation, BlobError> {
        let token = self
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BlobError::Fetch("No access token configured".to_string()))?;
        let url = format!(
            "{}/v1/media/presign/download?object_key={}",
            self.base_url,
            urlencoding::encode(object_key)
        );

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| BlobError::Fetch(format!("Failed to request download URL: {error}")))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BlobError::Fetch(format!(
                "Download URL request failed: {}",
                api_error_message(status, &body)
            )));
        }

        let payload = response.json::<PresignResponse>().await.map_err(|error| {
            BlobError::Fetch(format!("Failed to parse download URL response: {error}"))
        })?;
        Ok(payload.operation)
    }

    async fn fetch(&self, operation: &PresignedOperation) -> Result<BlobBytes, BlobError> {
        let method = Method::from_bytes(operation.method.as_bytes())
            .map_err(|error| BlobError::Fetch(format!("Unsupported HTTP method: {error}")))?;
        let mut request = self.client.request(method, &operation.url);
        for (name, value) in &operation.headers {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|error| BlobError::Fetch(format!("Download request failed: {error}")))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BlobError::Fetch(format!(
                "Download request failed: {}",
                api_error_message(status, &body)
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|error| BlobError::Fetch(format!("Failed to read blob bytes: {error}")))?;
        Ok(BlobBytes {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
